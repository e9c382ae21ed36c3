//! 应用层：把聊天文本路由到引擎操作，并把结果渲染成回复
//!
//! 引擎只报告错误，是否告知玩家由这里决定：没有游戏或回合时的猜测静默忽略，
//! 其余可预期的拒绝都会转成一条回复。

use anyhow::Result;
use std::sync::Arc;

use crate::announce;
use crate::command::{CommandMatch, is_command, match_command};
use crate::config::AppConfig;
use crate::engine::GameEngine;
use crate::error::GameError;
use crate::model::{Game, GameStatus, Round, Sponsor};
use crate::parsing::extract_guess;
use crate::{debug, info};

/// 传输层交给应用层的一条文本消息
#[derive(Debug, Clone)]
pub struct Incoming {
    pub chat_id: i64,
    pub user_id: i64,
    pub username: Option<String>,
    pub text: String,
}

impl Incoming {
    /// 负数 chat id 视为群聊
    pub fn is_group(&self) -> bool {
        self.chat_id < 0
    }

    fn display_name(&self) -> String {
        match &self.username {
            Some(name) => format!("@{}", name),
            None => format!("User {}", self.user_id),
        }
    }
}

pub struct GuessBot {
    engine: GameEngine,
    config: Arc<AppConfig>,
}

impl GuessBot {
    pub fn new(engine: GameEngine, config: Arc<AppConfig>) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &GameEngine {
        &self.engine
    }

    fn prefix(&self) -> &str {
        self.config
            .command_prefix
            .first()
            .map(String::as_str)
            .unwrap_or("/")
    }

    /// 处理一条消息，返回需要回复的文本
    pub async fn handle(&self, msg: &Incoming) -> Result<Option<String>> {
        if is_command(&msg.text, &self.config.command_prefix) {
            return self.handle_command(msg).await;
        }
        self.handle_guess(msg).await
    }

    // ================= 玩家 =================

    async fn handle_guess(&self, msg: &Incoming) -> Result<Option<String>> {
        if !msg.is_group() {
            return Ok(None);
        }
        let Some(value) = extract_guess(&msg.text) else {
            return Ok(None);
        };
        let rules = self.engine.rules();
        if !rules.in_range(value) {
            return Ok(Some(announce::invalid_guess(rules)));
        }

        let Some(game) = self.engine.active_game(msg.chat_id).await? else {
            return Ok(None);
        };
        if game.status != GameStatus::RoundActive {
            return Ok(Some(announce::not_accepting_guesses()));
        }
        let Some(round) = self.engine.active_round(game.id).await? else {
            return Ok(None);
        };

        let outcome = match self
            .engine
            .register_guess(game.id, round.id, msg.user_id, value)
            .await
        {
            Ok(outcome) => outcome,
            Err(GameError::OutOfRange { .. }) => return Ok(Some(announce::invalid_guess(rules))),
            Err(GameError::LimitExceeded { limit, .. }) => {
                return Ok(Some(announce::guess_limit_reached(limit)));
            }
            Err(GameError::InvalidStateTransition { .. }) => {
                return Ok(Some(announce::not_accepting_guesses()));
            }
            Err(GameError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if outcome.is_correct() {
            return self.announce_winner(msg, &game, &round).await;
        }
        Ok(Some(announce::hint(value, outcome.hint)))
    }

    async fn announce_winner(&self, msg: &Incoming, game: &Game, round: &Round) -> Result<Option<String>> {
        let loyalty = self.engine.compute_loyalty(game.id, msg.user_id).await?;

        match self.engine.finish_game(game.id, msg.user_id).await {
            Ok(_) => {}
            Err(GameError::InvalidStateTransition { .. }) => {
                // 其他请求已经先一步结束了游戏
                debug!(target: "Handler", "游戏 #{} 已结束，忽略用户 {} 的猜中", game.id, msg.user_id);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        }

        let reveal = self.engine.proof(game.id).await?;
        info!(
            target: "Handler",
            "游戏 #{} 由用户 {} 在第 {} 回合猜中，忠诚度 {}%，奖金 {:?}",
            game.id,
            msg.user_id,
            round.round_index,
            loyalty,
            game.prize_amount
        );
        Ok(Some(announce::winner(
            &msg.display_name(),
            round.round_index,
            loyalty,
            game.prize_amount,
            &reveal,
        )))
    }

    // ================= 指令 =================

    async fn handle_command(&self, msg: &Incoming) -> Result<Option<String>> {
        let prefixes = &self.config.command_prefix;
        let text = msg.text.as_str();

        if match_command(text, prefixes, "start").is_some()
            || match_command(text, prefixes, "help").is_some()
        {
            return Ok(Some(announce::help(self.engine.rules(), self.prefix())));
        }
        if match_command(text, prefixes, "status").is_some() {
            return self.status(msg).await;
        }
        if let Some(m) = match_command(text, prefixes, "verify") {
            return self.verify(&m).await;
        }

        let admin_commands: [&str; 8] = [
            "newgame",
            "startround",
            "pause",
            "resume",
            "closeround",
            "reveal",
            "cancel",
            "cost",
        ];
        let Some((name, m)) = admin_commands
            .iter()
            .find_map(|name| match_command(text, prefixes, name).map(|m| (*name, m)))
        else {
            return Ok(None);
        };

        if !self.config.is_admin(msg.user_id) {
            return Ok(Some(announce::only_admins()));
        }
        if !msg.is_group() {
            return Ok(Some(announce::group_only()));
        }
        debug!(target: "Handler", "用户 {} 在聊天 {} 执行 {}", msg.user_id, msg.chat_id, name);

        let result = match name {
            "newgame" => self.new_game(msg, &m).await,
            "startround" => self.start_round(msg, &m).await,
            "pause" => self.pause(msg).await,
            "resume" => self.resume(msg).await,
            "closeround" => self.close_round(msg).await,
            "reveal" => self.reveal(msg).await,
            "cancel" => self.cancel(msg).await,
            "cost" => self.cost(msg, &m).await,
            _ => return Ok(None),
        };
        match result {
            Ok(reply) => Ok(reply),
            Err(e) => rejection(e),
        }
    }

    async fn status(&self, msg: &Incoming) -> Result<Option<String>> {
        Ok(Some(match self.engine.status(msg.chat_id).await? {
            Some(report) => announce::status(&report),
            None => announce::no_active_game(self.prefix()),
        }))
    }

    async fn verify(&self, m: &CommandMatch<'_>) -> Result<Option<String>> {
        let Some(game_id) = m.words().next().and_then(|w| w.parse::<i64>().ok()) else {
            return Ok(Some(format!("Usage: {}verify <game id>", self.prefix())));
        };
        match self.engine.proof(game_id).await {
            Ok(reveal) => Ok(Some(announce::proof(&reveal))),
            Err(GameError::VerificationFailed { .. }) => {
                Ok(Some(announce::verify_result(game_id, false)))
            }
            Err(GameError::InvalidStateTransition { .. }) => {
                let game = self.engine.game(game_id).await?;
                Ok(Some(format!(
                    "Game #{} is still in progress. Commitment: {}",
                    game_id, game.target_hash
                )))
            }
            Err(e) => rejection(e),
        }
    }

    async fn new_game(&self, msg: &Incoming, m: &CommandMatch<'_>) -> Result<Option<String>, GameError> {
        let fields = m.fields();
        let field = |i: usize| fields.get(i).copied().flatten().map(str::to_string);

        let prize = match field(0).map(|p| p.parse::<f64>()) {
            Some(Ok(p)) if p.is_finite() && p >= 0.0 => p,
            _ => return Ok(Some(announce::newgame_usage(self.prefix()))),
        };
        if self.engine.active_game(msg.chat_id).await?.is_some() {
            return Ok(Some(announce::active_game_exists(self.prefix())));
        }

        let sponsor = Sponsor {
            name: field(1),
            start_message: field(2),
            end_message: field(3),
        };
        let (game, hash) = match self
            .engine
            .create_game(msg.chat_id, Some(prize), sponsor)
            .await
        {
            Ok(created) => created,
            Err(GameError::InvalidStateTransition { .. }) => {
                return Ok(Some(announce::active_game_exists(self.prefix())));
            }
            Err(e) => return Err(e),
        };
        Ok(Some(announce::game_created(
            self.engine.rules(),
            &hash,
            game.prize_amount,
            &game.sponsor,
        )))
    }

    async fn start_round(&self, msg: &Incoming, m: &CommandMatch<'_>) -> Result<Option<String>, GameError> {
        let Some(game) = self.engine.active_game(msg.chat_id).await? else {
            return Ok(Some(announce::no_active_game(self.prefix())));
        };
        let cost = m.words().next().and_then(|w| w.parse::<u32>().ok());
        let next = self.engine.rounds(game.id).await?.len() as u32 + 1;

        let round = self.engine.start_round(game.id, next, cost).await?;
        Ok(Some(announce::round_started(
            self.engine.rules(),
            round.round_index,
            round.cost_hint.unwrap_or_else(|| self.engine.cost_hint(round.round_index)),
            game.sponsor.start_message.as_deref(),
        )))
    }

    async fn open_round(&self, msg: &Incoming) -> Result<Option<(Game, Round)>, GameError> {
        let Some(game) = self.engine.active_game(msg.chat_id).await? else {
            return Ok(None);
        };
        Ok(self
            .engine
            .active_round(game.id)
            .await?
            .map(|round| (game, round)))
    }

    async fn pause(&self, msg: &Incoming) -> Result<Option<String>, GameError> {
        let Some((_, round)) = self.open_round(msg).await? else {
            return Ok(Some(announce::no_active_round()));
        };
        self.engine.pause_round(round.id).await?;
        Ok(Some(announce::round_paused()))
    }

    async fn resume(&self, msg: &Incoming) -> Result<Option<String>, GameError> {
        let Some((_, round)) = self.open_round(msg).await? else {
            return Ok(Some(announce::no_active_round()));
        };
        let round = self.engine.resume_round(round.id).await?;
        Ok(Some(announce::round_resumed(round.round_index)))
    }

    async fn close_round(&self, msg: &Incoming) -> Result<Option<String>, GameError> {
        let Some((game, round)) = self.open_round(msg).await? else {
            return Ok(Some(announce::no_active_round()));
        };
        let round = self.engine.close_round(round.id).await?;
        let next = self.engine.rounds(game.id).await?.len() as u32 + 1;
        Ok(Some(announce::round_closed(
            round.round_index,
            next,
            game.sponsor.end_message.as_deref(),
        )))
    }

    async fn reveal(&self, msg: &Incoming) -> Result<Option<String>, GameError> {
        let Some(game) = self.engine.active_game(msg.chat_id).await? else {
            return Ok(Some(announce::no_active_game(self.prefix())));
        };
        let reveal = self.engine.reveal_game(game.id).await?;
        Ok(Some(announce::manual_reveal(&reveal)))
    }

    async fn cancel(&self, msg: &Incoming) -> Result<Option<String>, GameError> {
        let Some(game) = self.engine.active_game(msg.chat_id).await? else {
            return Ok(Some(announce::no_active_game(self.prefix())));
        };
        self.engine.cancel_game(game.id).await?;
        Ok(Some(announce::game_canceled(self.prefix())))
    }

    async fn cost(&self, msg: &Incoming, m: &CommandMatch<'_>) -> Result<Option<String>, GameError> {
        let requested = m.words().next().and_then(|w| w.parse::<u32>().ok());
        let round_index = match requested {
            Some(n) if n > 0 => n,
            _ => match self.engine.active_game(msg.chat_id).await? {
                Some(game) => self.engine.rounds(game.id).await?.len() as u32 + 1,
                None => 1,
            },
        };
        Ok(Some(announce::cost_hint(
            round_index,
            self.engine.cost_hint(round_index),
        )))
    }
}

/// 可预期的拒绝转成回复，存储错误等继续向上传播
fn rejection(e: GameError) -> Result<Option<String>> {
    match e {
        GameError::NotFound { .. }
        | GameError::InvalidStateTransition { .. }
        | GameError::OutOfRange { .. }
        | GameError::LimitExceeded { .. } => Ok(Some(format!("Cannot do that: {}", e))),
        other => Err(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameRules;
    use crate::notify::LogSink;
    use crate::store::MemoryStore;

    const GROUP: i64 = -42;
    const ADMIN: i64 = 1;

    fn bot(admins: Vec<i64>) -> GuessBot {
        let config = AppConfig {
            admins,
            ..AppConfig::default()
        };
        let engine = GameEngine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(LogSink),
            GameRules::default(),
        );
        GuessBot::new(engine, Arc::new(config))
    }

    fn say(chat_id: i64, user_id: i64, text: &str) -> Incoming {
        Incoming {
            chat_id,
            user_id,
            username: None,
            text: text.to_string(),
        }
    }

    async fn reply(bot: &GuessBot, user_id: i64, text: &str) -> Option<String> {
        bot.handle(&say(GROUP, user_id, text)).await.unwrap()
    }

    #[tokio::test]
    async fn help_is_available_to_everyone() {
        let bot = bot(vec![ADMIN]);
        let text = reply(&bot, 99, "/help").await.unwrap();
        assert!(text.contains("/newgame"));
        assert!(reply(&bot, 99, "/start").await.is_some());
    }

    #[tokio::test]
    async fn admin_commands_are_restricted() {
        let bot = bot(vec![ADMIN]);
        assert_eq!(
            reply(&bot, 99, "/newgame 100").await.as_deref(),
            Some(announce::only_admins().as_str())
        );
        let private = bot.handle(&say(5, ADMIN, "/newgame 100")).await.unwrap();
        assert_eq!(private, Some(announce::group_only()));
    }

    #[tokio::test]
    async fn newgame_requires_prize_and_single_game() {
        let bot = bot(vec![]);
        let usage = reply(&bot, 7, "/newgame").await.unwrap();
        assert!(usage.starts_with("Usage:"));

        let created = reply(&bot, 7, "/newgame 1000 | Acme | hi | bye").await.unwrap();
        assert!(created.contains("Sponsored by: Acme"));
        let game = bot.engine().active_game(GROUP).await.unwrap().unwrap();
        assert!(created.contains(&game.target_hash));
        assert_eq!(game.sponsor.end_message.as_deref(), Some("bye"));

        let again = reply(&bot, 7, "/newgame 5").await.unwrap();
        assert!(again.contains("already an active game"));
    }

    #[tokio::test]
    async fn guesses_are_ignored_without_game() {
        let bot = bot(vec![]);
        assert_eq!(reply(&bot, 3, "500").await, None);
        assert_eq!(reply(&bot, 3, "hello").await, None);
        // 超出范围的数字仍会提示
        assert!(reply(&bot, 3, "0").await.unwrap().starts_with("Invalid guess"));
    }

    #[tokio::test(start_paused = true)]
    async fn round_commands_drive_state() {
        let bot = bot(vec![]);
        reply(&bot, 1, "/newgame 100").await.unwrap();
        assert_eq!(
            reply(&bot, 2, "123").await,
            Some(announce::not_accepting_guesses())
        );

        let started = reply(&bot, 1, "/startround").await.unwrap();
        assert!(started.starts_with("Round 1 started!"));
        assert!(started.contains("Suggested cost: 1"));

        let paused = reply(&bot, 1, "/pause").await.unwrap();
        assert_eq!(paused, announce::round_paused());
        assert_eq!(
            reply(&bot, 2, "123").await,
            Some(announce::not_accepting_guesses())
        );
        let again = reply(&bot, 1, "/pause").await.unwrap();
        assert!(again.starts_with("Cannot do that"));

        assert_eq!(reply(&bot, 1, "/resume").await, Some(announce::round_resumed(1)));
        let closed = reply(&bot, 1, "/closeround").await.unwrap();
        assert!(closed.contains("start round 2"));
        assert_eq!(reply(&bot, 1, "/pause").await, Some(announce::no_active_round()));

        let second = reply(&bot, 1, "/startround 9").await.unwrap();
        assert!(second.contains("Suggested cost: 9"));
    }

    #[tokio::test(start_paused = true)]
    async fn winning_guess_finishes_game() {
        let bot = bot(vec![]);
        reply(&bot, 1, "/newgame 1000").await.unwrap();
        reply(&bot, 1, "/startround").await.unwrap();
        let game = bot.engine().active_game(GROUP).await.unwrap().unwrap();

        let wrong = if game.number == 1 { 2 } else { 1 };
        let hint = reply(&bot, 8, &wrong.to_string()).await.unwrap();
        assert!(hint.starts_with("The secret number is"));

        let mut msg = say(GROUP, 8, &format!("is it {}?", game.number));
        msg.username = Some("alice".into());
        let text = bot.handle(&msg).await.unwrap().unwrap();
        assert!(text.contains("Winner: @alice"));
        assert!(text.contains("Prize won: 1000"));
        assert!(text.contains("Verification: VALID"));

        let finished = bot.engine().game(game.id).await.unwrap();
        assert_eq!(finished.status, GameStatus::GameFinished);
        assert_eq!(finished.winner_user_id, Some(8));
        assert!(bot.engine().active_game(GROUP).await.unwrap().is_none());
        assert_eq!(reply(&bot, 9, &game.number.to_string()).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn limit_reply_after_ten_guesses() {
        let bot = bot(vec![]);
        reply(&bot, 1, "/newgame 10").await.unwrap();
        reply(&bot, 1, "/startround").await.unwrap();
        let game = bot.engine().active_game(GROUP).await.unwrap().unwrap();
        let wrong = if game.number == 1 { 2 } else { 1 };

        for _ in 0..10 {
            reply(&bot, 4, &wrong.to_string()).await.unwrap();
        }
        assert_eq!(
            reply(&bot, 4, &wrong.to_string()).await,
            Some(announce::guess_limit_reached(10))
        );
    }

    #[tokio::test]
    async fn reveal_and_verify() {
        let bot = bot(vec![]);
        reply(&bot, 1, "/newgame 10").await.unwrap();
        let game = bot.engine().active_game(GROUP).await.unwrap().unwrap();

        let pending = reply(&bot, 5, &format!("/verify {}", game.id)).await.unwrap();
        assert!(pending.contains("still in progress"));

        let revealed = reply(&bot, 1, "/reveal").await.unwrap();
        assert!(revealed.contains(&format!("The secret number was: {}", game.number)));

        let verified = reply(&bot, 5, &format!("/verify {}", game.id)).await.unwrap();
        assert!(verified.contains("Verification: VALID"));
        let missing = reply(&bot, 5, "/verify 999").await.unwrap();
        assert!(missing.starts_with("Cannot do that"));
    }

    #[tokio::test]
    async fn cost_and_status() {
        let bot = bot(vec![]);
        assert!(reply(&bot, 1, "/status").await.unwrap().starts_with("No active game"));
        assert!(reply(&bot, 1, "/cost").await.unwrap().contains("Suggested: 1"));
        assert!(reply(&bot, 1, "/cost 3").await.unwrap().contains("Suggested: 20"));
        assert!(reply(&bot, 1, "/cost 99").await.unwrap().contains("Suggested: 1000"));

        reply(&bot, 1, "/newgame 10").await.unwrap();
        let status = reply(&bot, 1, "/status").await.unwrap();
        assert!(status.contains("GAME_COMMITTED"));

        let canceled = reply(&bot, 1, "/cancel").await.unwrap();
        assert!(canceled.starts_with("Game canceled"));
        assert!(bot.engine().active_game(GROUP).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_commands_are_ignored() {
        let bot = bot(vec![]);
        assert_eq!(reply(&bot, 1, "/dance").await, None);
    }
}
