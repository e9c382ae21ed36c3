use sea_orm::DbErr;
use thiserror::Error;

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] DbErr),

    /// 唯一性约束冲突 (同一聊天的活动游戏 / 同一游戏的活动回合)
    #[error("conflict: {0}")]
    Conflict(String),

    /// 持久化数据无法还原为领域类型
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// 引擎操作错误
#[derive(Debug, Error)]
pub enum GameError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("cannot {action} while {state}")]
    InvalidStateTransition { action: &'static str, state: String },

    #[error("guess {value} is outside [{min}, {max}]")]
    OutOfRange { value: i64, min: i64, max: i64 },

    #[error("user {user_id} already made {limit} guesses in round {round_id}")]
    LimitExceeded {
        user_id: i64,
        round_id: i64,
        limit: u32,
    },

    /// 重新计算的哈希与已发布承诺不一致，只可能源于缺陷或数据被篡改
    #[error("commitment verification failed for game {game_id}")]
    VerificationFailed { game_id: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GameError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        GameError::NotFound { entity, id }
    }

    pub(crate) fn invalid(action: &'static str, state: impl Into<String>) -> Self {
        GameError::InvalidStateTransition {
            action,
            state: state.into(),
        }
    }
}

pub type GameResult<T> = Result<T, GameError>;
