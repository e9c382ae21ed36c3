//! 游戏引擎：游戏 / 回合状态机、猜测登记、忠诚度与承诺校验
//!
//! 引擎本身不持有领域状态，所有实体都存放在 [`Store`] 中；
//! 唯一的私有可变状态是回合计时器登记表。

use chrono::Utc;
use rand::Rng;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::commit;
use crate::config::{GameRules, ResumePolicy};
use crate::error::{GameError, GameResult, StoreError};
use crate::loyalty::loyalty_percent;
use crate::model::{
    Game, GameStatus, Guess, NewGame, NewGuess, NewRound, Round, RoundStatus, Sponsor,
};
use crate::notify::{NotificationSink, RoundClosed};
use crate::store::{GuessRecord, Store};
use crate::timer::{RoundTimers, TimerTicket};
use crate::{debug, error, info, warn};

/// 相对于秘密数字的提示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    /// 秘密数字更大
    Higher,
    /// 秘密数字更小
    Lower,
    Correct,
}

#[derive(Debug, Clone)]
pub struct GuessOutcome {
    pub guess: Guess,
    pub hint: Hint,
    /// 写入后回合的总猜测数
    pub round_total: u32,
}

impl GuessOutcome {
    pub fn is_correct(&self) -> bool {
        self.guess.is_correct
    }
}

/// 公开的 (number, salt, hash) 三元组，任何人都可以据此复核承诺
#[derive(Debug, Clone, PartialEq)]
pub struct Reveal {
    pub game_id: i64,
    pub number: i64,
    pub salt: String,
    pub target_hash: String,
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub game: Game,
    pub active_round: Option<Round>,
    pub rounds: Vec<Round>,
    pub last_guess: Option<Guess>,
}

#[derive(Clone)]
pub struct GameEngine {
    store: Arc<dyn Store>,
    sink: Arc<dyn NotificationSink>,
    timers: Arc<RoundTimers>,
    rules: Arc<GameRules>,
}

impl GameEngine {
    pub fn new(store: Arc<dyn Store>, sink: Arc<dyn NotificationSink>, rules: GameRules) -> Self {
        Self {
            store,
            sink,
            timers: Arc::new(RoundTimers::new()),
            rules: Arc::new(rules),
        }
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn timers(&self) -> &RoundTimers {
        &self.timers
    }

    pub fn cost_hint(&self, round_index: u32) -> u32 {
        self.rules.cost_hint(round_index)
    }

    /// 取消所有计时器，进程退出前调用
    pub fn shutdown(&self) {
        info!(target: "Engine", "正在关闭，取消 {} 个回合计时器", self.timers.len());
        self.timers.shutdown();
    }

    // ================= 查询 =================

    pub async fn game(&self, game_id: i64) -> GameResult<Game> {
        self.store
            .get_game(game_id)
            .await?
            .ok_or_else(|| GameError::not_found("game", game_id))
    }

    pub async fn round(&self, round_id: i64) -> GameResult<Round> {
        self.store
            .get_round(round_id)
            .await?
            .ok_or_else(|| GameError::not_found("round", round_id))
    }

    pub async fn active_game(&self, chat_id: i64) -> GameResult<Option<Game>> {
        Ok(self.store.active_game(chat_id).await?)
    }

    pub async fn active_round(&self, game_id: i64) -> GameResult<Option<Round>> {
        Ok(self.store.active_round(game_id).await?)
    }

    pub async fn rounds(&self, game_id: i64) -> GameResult<Vec<Round>> {
        Ok(self.store.rounds_for_game(game_id).await?)
    }

    pub async fn latest_game(&self, chat_id: i64) -> GameResult<Option<Game>> {
        Ok(self.store.latest_game(chat_id).await?)
    }

    pub async fn user_guesses(&self, round_id: i64, user_id: i64) -> GameResult<Vec<Guess>> {
        Ok(self.store.user_guesses_in_round(round_id, user_id).await?)
    }

    pub async fn status(&self, chat_id: i64) -> GameResult<Option<StatusReport>> {
        let Some(game) = self.store.active_game(chat_id).await? else {
            return Ok(None);
        };
        let rounds = self.store.rounds_for_game(game.id).await?;
        let active_round = rounds.iter().find(|r| r.status.is_open()).cloned();
        let last_guess = match &active_round {
            Some(round) => self.store.last_guess(round.id).await?,
            None => None,
        };
        Ok(Some(StatusReport {
            game,
            active_round,
            rounds,
            last_guess,
        }))
    }

    // ================= 游戏 =================

    /// 抽取秘密数字并写入承诺，返回游戏与公开哈希
    pub async fn create_game(
        &self,
        chat_id: i64,
        prize_amount: Option<f64>,
        sponsor: Sponsor,
    ) -> GameResult<(Game, String)> {
        let (number, commitment) = {
            let number = rand::rng().random_range(self.rules.min_number..=self.rules.max_number);
            (number, commit::commit(number))
        };

        let new = NewGame {
            chat_id,
            target_hash: commitment.hash,
            salt: commitment.salt,
            number,
            created_at: Utc::now(),
            prize_amount,
            sponsor,
        };
        let game = match self.store.create_game(new).await {
            Ok(game) => game,
            Err(StoreError::Conflict(_)) => {
                return Err(GameError::invalid(
                    "create a game",
                    format!("chat {} already has an open game", chat_id),
                ));
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            target: "Engine",
            "聊天 {} 创建游戏 #{}，承诺哈希 {}",
            chat_id,
            game.id,
            game.target_hash
        );
        let hash = game.target_hash.clone();
        Ok((game, hash))
    }

    /// 以获胜者结束游戏，同时关闭仍在进行的回合
    pub async fn finish_game(&self, game_id: i64, winner_user_id: i64) -> GameResult<Game> {
        self.end_game(game_id, Some(winner_user_id)).await
    }

    pub async fn cancel_game(&self, game_id: i64) -> GameResult<Game> {
        let game = self.game(game_id).await?;
        if game.status.is_terminal() {
            return Err(GameError::invalid(
                "cancel the game",
                format!("game {} is {}", game_id, game.status),
            ));
        }
        self.wind_down(game_id).await?;

        if !self
            .store
            .transition_game(game_id, &GameStatus::OPEN, GameStatus::GameCanceled)
            .await?
        {
            let current = self.game(game_id).await.unwrap_or(game);
            return Err(GameError::invalid(
                "cancel the game",
                format!("game {} is {}", game_id, current.status),
            ));
        }

        info!(target: "Engine", "游戏 #{} 已取消", game_id);
        self.game(game_id).await
    }

    /// 管理员公开：无获胜者地结束游戏并返回证明
    pub async fn reveal_game(&self, game_id: i64) -> GameResult<Reveal> {
        self.end_game(game_id, None).await?;
        self.proof(game_id).await
    }

    /// 终止状态游戏的公开证明，返回前会重新校验承诺
    pub async fn proof(&self, game_id: i64) -> GameResult<Reveal> {
        let game = self.game(game_id).await?;
        let Some(number) = game.revealed_number() else {
            return Err(GameError::invalid(
                "reveal the number",
                format!("game {} is {}", game_id, game.status),
            ));
        };
        if !commit::verify(number, &game.salt, &game.target_hash) {
            error!(
                target: "Engine",
                "游戏 #{} 承诺校验失败！数据可能被篡改 (hash={})",
                game_id,
                game.target_hash
            );
            return Err(GameError::VerificationFailed { game_id });
        }
        Ok(Reveal {
            game_id,
            number,
            salt: game.salt,
            target_hash: game.target_hash,
        })
    }

    pub async fn verify_game(&self, game_id: i64) -> GameResult<bool> {
        let game = self.game(game_id).await?;
        let ok = commit::verify(game.number, &game.salt, &game.target_hash);
        if !ok {
            error!(target: "Engine", "游戏 #{} 承诺校验失败！", game_id);
        }
        Ok(ok)
    }

    /// 获胜者的忠诚度百分比 (50..=100)
    pub async fn compute_loyalty(&self, game_id: i64, winner_user_id: i64) -> GameResult<u32> {
        self.game(game_id).await?;
        let started: BTreeSet<u32> = self
            .store
            .rounds_for_game(game_id)
            .await?
            .iter()
            .map(|r| r.round_index)
            .collect();
        let participated: BTreeSet<u32> = self
            .store
            .participated_round_indices(game_id, winner_user_id)
            .await?
            .into_iter()
            .collect();
        Ok(loyalty_percent(&started, &participated))
    }

    async fn end_game(&self, game_id: i64, winner_user_id: Option<i64>) -> GameResult<Game> {
        let game = self.game(game_id).await?;
        if game.status.is_terminal() {
            return Err(GameError::invalid(
                "finish the game",
                format!("game {} is {}", game_id, game.status),
            ));
        }
        self.wind_down(game_id).await?;

        if !self
            .store
            .finish_game(game_id, winner_user_id, Utc::now())
            .await?
        {
            let current = self.game(game_id).await.unwrap_or(game);
            return Err(GameError::invalid(
                "finish the game",
                format!("game {} is {}", game_id, current.status),
            ));
        }

        match winner_user_id {
            Some(user_id) => info!(target: "Engine", "游戏 #{} 结束，获胜者 {}", game_id, user_id),
            None => info!(target: "Engine", "游戏 #{} 被管理员公开结束", game_id),
        }
        self.game(game_id).await
    }

    /// 终止游戏前先关闭未结束的回合，之后的猜测都会因回合已关闭而被拒绝
    async fn wind_down(&self, game_id: i64) -> GameResult<()> {
        if let Some(round) = self.store.active_round(game_id).await? {
            self.timers.cancel(round.id);
            self.store
                .transition_round(
                    round.id,
                    &RoundStatus::OPEN,
                    RoundStatus::Closed,
                    Some(Utc::now()),
                )
                .await?;
        }
        Ok(())
    }

    // ================= 回合 =================

    /// `cost_hint` 为空时按回合花费表取值
    pub async fn start_round(
        &self,
        game_id: i64,
        round_index: u32,
        cost_hint: Option<u32>,
    ) -> GameResult<Round> {
        let game = self.game(game_id).await?;
        let rounds = self.store.rounds_for_game(game_id).await?;
        if let Some(open) = rounds.iter().find(|r| r.status.is_open()) {
            return Err(GameError::invalid(
                "start a round",
                format!("round {} is {}", open.round_index, open.status),
            ));
        }
        if game.status != GameStatus::GameCommitted {
            return Err(GameError::invalid(
                "start a round",
                format!("game {} is {}", game_id, game.status),
            ));
        }
        let expected = rounds.len() as u32 + 1;
        if round_index != expected {
            return Err(GameError::invalid(
                "start a round",
                format!("round {} was requested but the next round is {}", round_index, expected),
            ));
        }

        let new = NewRound {
            game_id,
            round_index,
            cost_hint: Some(cost_hint.unwrap_or_else(|| self.rules.cost_hint(round_index))),
            started_at: Utc::now(),
        };
        let round = match self.store.create_round(new).await {
            Ok(round) => round,
            Err(StoreError::Conflict(msg)) => return Err(GameError::invalid("start a round", msg)),
            Err(e) => return Err(e.into()),
        };

        if !self
            .store
            .transition_game(game_id, &[GameStatus::GameCommitted], GameStatus::RoundActive)
            .await?
        {
            // 游戏在此期间被结束或取消，撤销刚创建的回合
            self.store
                .transition_round(
                    round.id,
                    &RoundStatus::OPEN,
                    RoundStatus::Closed,
                    Some(Utc::now()),
                )
                .await?;
            let current = self.game(game_id).await?;
            return Err(GameError::invalid(
                "start a round",
                format!("game {} is {}", game_id, current.status),
            ));
        }

        self.arm_timer(&round);
        info!(
            target: "Engine",
            "游戏 #{} 第 {} 回合开始 (round #{})",
            game_id,
            round_index,
            round.id
        );
        Ok(round)
    }

    pub async fn pause_round(&self, round_id: i64) -> GameResult<Round> {
        let round = self.round(round_id).await?;
        if !self
            .store
            .transition_round(round_id, &[RoundStatus::Active], RoundStatus::Paused, None)
            .await?
        {
            let current = self.round(round_id).await?;
            return Err(GameError::invalid(
                "pause the round",
                format!("round {} is {}", current.round_index, current.status),
            ));
        }
        self.timers.cancel(round_id);

        if !self
            .store
            .transition_game(round.game_id, &[GameStatus::RoundActive], GameStatus::RoundPaused)
            .await?
        {
            warn!(target: "Engine", "暂停回合 #{} 时游戏 #{} 状态已变化", round_id, round.game_id);
        }
        info!(target: "Engine", "回合 #{} 已暂停", round_id);
        self.round(round_id).await
    }

    pub async fn resume_round(&self, round_id: i64) -> GameResult<Round> {
        let round = self.round(round_id).await?;
        if !self
            .store
            .transition_round(round_id, &[RoundStatus::Paused], RoundStatus::Active, None)
            .await?
        {
            let current = self.round(round_id).await?;
            return Err(GameError::invalid(
                "resume the round",
                format!("round {} is {}", current.round_index, current.status),
            ));
        }
        if !self
            .store
            .transition_game(round.game_id, &[GameStatus::RoundPaused], GameStatus::RoundActive)
            .await?
        {
            warn!(target: "Engine", "恢复回合 #{} 时游戏 #{} 状态已变化", round_id, round.game_id);
        }

        match self.rules.resume_policy {
            ResumePolicy::Restart => self.arm_timer(&round),
        }
        info!(target: "Engine", "回合 #{} 已恢复，计时重新开始", round_id);
        self.round(round_id).await
    }

    pub async fn close_round(&self, round_id: i64) -> GameResult<Round> {
        let round = self.round(round_id).await?;
        if !self
            .store
            .transition_round(
                round_id,
                &RoundStatus::OPEN,
                RoundStatus::Closed,
                Some(Utc::now()),
            )
            .await?
        {
            let current = self.round(round_id).await?;
            return Err(GameError::invalid(
                "close the round",
                format!("round {} is {}", current.round_index, current.status),
            ));
        }
        self.timers.cancel(round_id);

        self.store
            .transition_game(
                round.game_id,
                &[GameStatus::RoundActive, GameStatus::RoundPaused],
                GameStatus::GameCommitted,
            )
            .await?;
        info!(target: "Engine", "回合 #{} 已手动结束", round_id);
        self.round(round_id).await
    }

    // ================= 猜测 =================

    /// 登记一次猜测；猜中时不会改变游戏状态，由调用方决定何时 `finish_game`
    pub async fn register_guess(
        &self,
        game_id: i64,
        round_id: i64,
        user_id: i64,
        value: i64,
    ) -> GameResult<GuessOutcome> {
        if !self.rules.in_range(value) {
            return Err(GameError::OutOfRange {
                value,
                min: self.rules.min_number,
                max: self.rules.max_number,
            });
        }

        let game = self.game(game_id).await?;
        if game.status != GameStatus::RoundActive {
            return Err(GameError::invalid(
                "register a guess",
                format!("game {} is {}", game_id, game.status),
            ));
        }
        let round = self.round(round_id).await?;
        if round.game_id != game_id {
            return Err(GameError::not_found("round", round_id));
        }
        if round.status != RoundStatus::Active {
            return Err(GameError::invalid(
                "register a guess",
                format!("round {} is {}", round.round_index, round.status),
            ));
        }

        let hint = match value.cmp(&game.number) {
            Ordering::Less => Hint::Higher,
            Ordering::Greater => Hint::Lower,
            Ordering::Equal => Hint::Correct,
        };
        let new = NewGuess {
            game_id,
            round_id,
            user_id,
            value,
            is_correct: hint == Hint::Correct,
            created_at: Utc::now(),
        };

        let limit = self.rules.max_guesses_per_player;
        match self.store.record_guess(new, limit).await? {
            GuessRecord::Recorded { guess, round_total } => {
                debug!(
                    target: "Engine",
                    "回合 #{} 用户 {} 猜测 {} (本回合第 {} 次)",
                    round_id,
                    user_id,
                    value,
                    round_total
                );
                if round_total >= self.rules.min_guesses_before_close {
                    self.timers.nudge(round_id);
                }
                Ok(GuessOutcome {
                    guess,
                    hint,
                    round_total,
                })
            }
            GuessRecord::LimitReached => Err(GameError::LimitExceeded {
                user_id,
                round_id,
                limit,
            }),
            GuessRecord::RoundNotActive => {
                let current = self.round(round_id).await?;
                Err(GameError::invalid(
                    "register a guess",
                    format!("round {} is {}", current.round_index, current.status),
                ))
            }
        }
    }

    // ================= 计时器 =================

    fn arm_timer(&self, round: &Round) {
        let engine = self.clone();
        let round_id = round.id;
        let game_id = round.game_id;
        self.timers
            .arm(round_id, move |ticket| engine.watch_round(round_id, game_id, ticket));
    }

    async fn watch_round(self, round_id: i64, game_id: i64, mut ticket: TimerTicket) {
        debug!(
            target: "Timer",
            "游戏 #{} 回合 #{} 计时开始，{} 秒后检查",
            game_id,
            round_id,
            self.rules.round_duration_secs
        );
        if !ticket.sleep(self.rules.round_duration()).await {
            return;
        }

        loop {
            let round = match self.store.get_round(round_id).await {
                Ok(Some(round)) => round,
                Ok(None) => {
                    warn!(target: "Timer", "回合 #{} 已不存在，计时结束", round_id);
                    return;
                }
                Err(e) => {
                    error!(target: "Timer", "读取回合 #{} 失败，计时结束: {}", round_id, e);
                    return;
                }
            };
            if round.status != RoundStatus::Active {
                debug!(target: "Timer", "回合 #{} 状态为 {}，计时结束", round_id, round.status);
                return;
            }

            if round.total_guesses >= self.rules.min_guesses_before_close {
                if ticket.is_cancelled() {
                    return;
                }
                match self.auto_close_round(round_id).await {
                    Ok(true) => {}
                    Ok(false) => debug!(target: "Timer", "回合 #{} 已被其他操作结束", round_id),
                    Err(e) => error!(target: "Timer", "自动结束回合 #{} 失败: {}", round_id, e),
                }
                return;
            }

            debug!(
                target: "Timer",
                "回合 #{} 猜测数 {}/{}，继续等待",
                round_id,
                round.total_guesses,
                self.rules.min_guesses_before_close
            );
            if !ticket.wait_poll(self.rules.poll_interval()).await {
                return;
            }
        }
    }

    /// 计时器触发的结束路径，成功时推送回合结束事件
    async fn auto_close_round(&self, round_id: i64) -> GameResult<bool> {
        if !self
            .store
            .transition_round(
                round_id,
                &[RoundStatus::Active],
                RoundStatus::Closed,
                Some(Utc::now()),
            )
            .await?
        {
            return Ok(false);
        }

        let round = self.round(round_id).await?;
        if !self
            .store
            .transition_game(round.game_id, &[GameStatus::RoundActive], GameStatus::GameCommitted)
            .await?
        {
            // 游戏已经结束或取消，不再公告
            return Ok(false);
        }

        let game = self.game(round.game_id).await?;
        let next_round_index = self.store.rounds_for_game(game.id).await?.len() as u32 + 1;
        info!(
            target: "Timer",
            "游戏 #{} 第 {} 回合自动结束 (共 {} 次猜测)",
            game.id,
            round.round_index,
            round.total_guesses
        );

        let event = RoundClosed {
            game_id: game.id,
            chat_id: game.chat_id,
            round_id,
            round_index: round.round_index,
            next_round_index,
            sponsor_end_message: game.sponsor.end_message,
        };
        if let Err(e) = self.sink.round_closed(event).await {
            error!(target: "Timer", "回合 #{} 结束公告推送失败: {}", round_id, e);
        }
        Ok(true)
    }
}
