use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ================= 状态 =================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Idle,
    GameCommitted,
    RoundActive,
    RoundPaused,
    GameFinished,
    GameCanceled,
}

impl GameStatus {
    /// 非终止状态 (同一聊天至多一个)
    pub const OPEN: [GameStatus; 3] = [
        GameStatus::GameCommitted,
        GameStatus::RoundActive,
        GameStatus::RoundPaused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::Idle => "IDLE",
            GameStatus::GameCommitted => "GAME_COMMITTED",
            GameStatus::RoundActive => "ROUND_ACTIVE",
            GameStatus::RoundPaused => "ROUND_PAUSED",
            GameStatus::GameFinished => "GAME_FINISHED",
            GameStatus::GameCanceled => "GAME_CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GameStatus::GameFinished | GameStatus::GameCanceled)
    }
}

impl FromStr for GameStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "IDLE" => GameStatus::Idle,
            "GAME_COMMITTED" => GameStatus::GameCommitted,
            "ROUND_ACTIVE" => GameStatus::RoundActive,
            "ROUND_PAUSED" => GameStatus::RoundPaused,
            "GAME_FINISHED" => GameStatus::GameFinished,
            "GAME_CANCELED" => GameStatus::GameCanceled,
            other => return Err(format!("unknown game status `{}`", other)),
        })
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    #[default]
    Pending,
    Active,
    Paused,
    Closed,
}

impl RoundStatus {
    /// 未结束的回合状态 (同一游戏至多一个)
    pub const OPEN: [RoundStatus; 2] = [RoundStatus::Active, RoundStatus::Paused];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Pending => "PENDING",
            RoundStatus::Active => "ACTIVE",
            RoundStatus::Paused => "PAUSED",
            RoundStatus::Closed => "CLOSED",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, RoundStatus::Active | RoundStatus::Paused)
    }
}

impl FromStr for RoundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PENDING" => RoundStatus::Pending,
            "ACTIVE" => RoundStatus::Active,
            "PAUSED" => RoundStatus::Paused,
            "CLOSED" => RoundStatus::Closed,
            other => return Err(format!("unknown round status `{}`", other)),
        })
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ================= 实体 =================

/// 赞助信息 (名称 / 回合开始语 / 回合结束语)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sponsor {
    pub name: Option<String>,
    pub start_message: Option<String>,
    pub end_message: Option<String>,
}

/// 一局游戏
///
/// `number` 与 `salt` 只在游戏进入终止状态后才通过 [`Game::revealed_number`] /
/// [`Game::revealed_salt`] 暴露，在此之前外部只能看到 `target_hash`。
/// 数字范围很小，提前拿到盐就能穷举出数字。
#[derive(Clone, PartialEq)]
pub struct Game {
    pub id: i64,
    pub chat_id: i64,
    pub status: GameStatus,
    pub target_hash: String,
    pub(crate) salt: String,
    pub(crate) number: i64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub winner_user_id: Option<i64>,
    pub prize_amount: Option<f64>,
    pub sponsor: Sponsor,
}

impl Game {
    pub fn revealed_number(&self) -> Option<i64> {
        self.status.is_terminal().then_some(self.number)
    }

    pub fn revealed_salt(&self) -> Option<&str> {
        self.status.is_terminal().then_some(self.salt.as_str())
    }
}

// 手写 Debug，未结束的游戏不打印数字和盐
impl fmt::Debug for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Game")
            .field("id", &self.id)
            .field("chat_id", &self.chat_id)
            .field("status", &self.status)
            .field("target_hash", &self.target_hash)
            .field("salt", &self.revealed_salt().unwrap_or("<hidden>"))
            .field("number", &self.revealed_number())
            .field("created_at", &self.created_at)
            .field("finished_at", &self.finished_at)
            .field("winner_user_id", &self.winner_user_id)
            .field("prize_amount", &self.prize_amount)
            .field("sponsor", &self.sponsor)
            .finish()
    }
}

/// 待写入的新游戏
#[derive(Debug, Clone)]
pub struct NewGame {
    pub chat_id: i64,
    pub target_hash: String,
    pub salt: String,
    pub number: i64,
    pub created_at: DateTime<Utc>,
    pub prize_amount: Option<f64>,
    pub sponsor: Sponsor,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    pub id: i64,
    pub game_id: i64,
    /// 从 1 开始，游戏内连续递增
    pub round_index: u32,
    pub status: RoundStatus,
    pub cost_hint: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_guesses: u32,
}

#[derive(Debug, Clone)]
pub struct NewRound {
    pub game_id: i64,
    pub round_index: u32,
    pub cost_hint: Option<u32>,
    pub started_at: DateTime<Utc>,
}

/// 一次猜测，写入后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct Guess {
    pub id: i64,
    pub game_id: i64,
    pub round_id: i64,
    pub user_id: i64,
    pub value: i64,
    pub is_correct: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGuess {
    pub game_id: i64,
    pub round_id: i64,
    pub user_id: i64,
    pub value: i64,
    pub is_correct: bool,
    pub created_at: DateTime<Utc>,
}

/// (game, round, user) 维度的猜测计数
#[derive(Debug, Clone, PartialEq)]
pub struct Participation {
    pub id: i64,
    pub game_id: i64,
    pub round_id: i64,
    pub user_id: i64,
    pub guesses_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in [
            GameStatus::Idle,
            GameStatus::GameCommitted,
            GameStatus::RoundActive,
            GameStatus::RoundPaused,
            GameStatus::GameFinished,
            GameStatus::GameCanceled,
        ] {
            assert_eq!(status.as_str().parse::<GameStatus>().unwrap(), status);
        }
        assert!("FINISHED".parse::<GameStatus>().is_err());
        assert_eq!("PAUSED".parse::<RoundStatus>().unwrap(), RoundStatus::Paused);
    }

    #[test]
    fn number_hidden_until_terminal() {
        let mut game = Game {
            id: 1,
            chat_id: -100,
            status: GameStatus::RoundActive,
            target_hash: "h".into(),
            salt: "c0ffee".into(),
            number: 4242,
            created_at: DateTime::from_timestamp(0, 0).unwrap(),
            finished_at: None,
            winner_user_id: None,
            prize_amount: None,
            sponsor: Sponsor::default(),
        };
        assert_eq!(game.revealed_number(), None);
        assert_eq!(game.revealed_salt(), None);
        let debug = format!("{:?}", game);
        assert!(!debug.contains("4242"));
        assert!(!debug.contains("c0ffee"));

        game.status = GameStatus::GameCanceled;
        assert_eq!(game.revealed_number(), Some(4242));
        assert_eq!(game.revealed_salt(), Some("c0ffee"));
        assert!(format!("{:?}", game).contains("c0ffee"));
    }

    #[test]
    fn round_status_defaults_to_pending() {
        assert_eq!(RoundStatus::default(), RoundStatus::Pending);
        assert!(!RoundStatus::Closed.is_open());
        assert!(RoundStatus::Paused.is_open());
    }
}
