//! 可证明公平的多人猜数字游戏
//!
//! 每局游戏开始前公布秘密数字的 SHA-256 承诺，结束时公开数字与盐供任何人复核。
//! [`engine::GameEngine`] 负责游戏 / 回合状态机与回合计时器，
//! [`handler::GuessBot`] 把聊天文本路由到引擎。

// log 必须最先声明，其余模块依赖其中的宏
pub mod log;

pub mod adapters;
pub mod announce;
pub mod command;
pub mod commit;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod handler;
pub mod loyalty;
pub mod model;
pub mod notify;
pub mod parsing;
pub mod store;
pub mod timer;

pub use engine::GameEngine;
pub use error::{GameError, GameResult, StoreError};
