//! 引擎依赖的持久化接口
//!
//! 所有状态变更都以“比较后写入”的方式提供：调用方给出允许的旧状态，
//! 存储层只在当前状态匹配时写入并返回 `true`，从而保证单行状态转换可线性化。

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;

use crate::error::StoreError;
use crate::model::{
    Game, GameStatus, Guess, NewGame, NewGuess, NewRound, Participation, Round, RoundStatus,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// `record_guess` 的结果
#[derive(Debug, Clone, PartialEq)]
pub enum GuessRecord {
    /// 已写入，附带回合最新的总猜测数
    Recorded { guess: Guess, round_total: u32 },
    /// 该玩家本回合已达到上限，未写入
    LimitReached,
    /// 回合不存在、不属于该游戏、不处于 ACTIVE，或游戏已结束，未写入
    RoundNotActive,
}

pub trait Store: Send + Sync {
    // ---------------- Game ----------------

    /// 写入新游戏 (状态 GAME_COMMITTED)，同一聊天已有未结束游戏时返回 `Conflict`
    fn create_game(&self, game: NewGame) -> BoxFuture<'_, StoreResult<Game>>;

    fn get_game(&self, game_id: i64) -> BoxFuture<'_, StoreResult<Option<Game>>>;

    /// 聊天中未结束的游戏
    fn active_game(&self, chat_id: i64) -> BoxFuture<'_, StoreResult<Option<Game>>>;

    /// 聊天中最近创建的游戏 (含已结束)
    fn latest_game(&self, chat_id: i64) -> BoxFuture<'_, StoreResult<Option<Game>>>;

    fn transition_game(
        &self,
        game_id: i64,
        from: &'static [GameStatus],
        to: GameStatus,
    ) -> BoxFuture<'_, StoreResult<bool>>;

    /// 未结束游戏 -> GAME_FINISHED，记录结束时间与获胜者
    fn finish_game(
        &self,
        game_id: i64,
        winner_user_id: Option<i64>,
        finished_at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<bool>>;

    // ---------------- Round ----------------

    /// 写入新回合 (状态 ACTIVE)，同一游戏已有未结束回合或序号重复时返回 `Conflict`
    fn create_round(&self, round: NewRound) -> BoxFuture<'_, StoreResult<Round>>;

    fn get_round(&self, round_id: i64) -> BoxFuture<'_, StoreResult<Option<Round>>>;

    /// 游戏中处于 ACTIVE / PAUSED 的回合
    fn active_round(&self, game_id: i64) -> BoxFuture<'_, StoreResult<Option<Round>>>;

    /// 按序号升序
    fn rounds_for_game(&self, game_id: i64) -> BoxFuture<'_, StoreResult<Vec<Round>>>;

    fn transition_round(
        &self,
        round_id: i64,
        from: &'static [RoundStatus],
        to: RoundStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, StoreResult<bool>>;

    // ---------------- Guess / Participation ----------------

    /// 原子地写入猜测、累加回合计数并更新参与记录
    fn record_guess(&self, guess: NewGuess, limit: u32) -> BoxFuture<'_, StoreResult<GuessRecord>>;

    /// 按时间升序
    fn user_guesses_in_round(
        &self,
        round_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StoreResult<Vec<Guess>>>;

    fn last_guess(&self, round_id: i64) -> BoxFuture<'_, StoreResult<Option<Guess>>>;

    fn participation(
        &self,
        round_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StoreResult<Option<Participation>>>;

    /// 用户至少猜过一次的回合序号 (升序去重)
    fn participated_round_indices(
        &self,
        game_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StoreResult<Vec<u32>>>;
}
