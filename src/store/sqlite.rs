use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use sea_orm::ActiveValue::{NotSet, Set};
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, SqlErr, TransactionTrait,
};

use super::{GuessRecord, Store, StoreResult};
use crate::config::DatabaseConfig;
use crate::db::{self, entity};
use crate::error::StoreError;
use crate::model::{
    Game, GameStatus, Guess, NewGame, NewGuess, NewRound, Participation, Round, RoundStatus,
    Sponsor,
};
use entity::{game, guess, participation, round};

/// 基于 SeaORM + SQLite 的存储
#[derive(Clone)]
pub struct SqliteStore {
    db: DatabaseConnection,
}

impl SqliteStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn open(cfg: &DatabaseConfig) -> StoreResult<Self> {
        Ok(Self::new(db::init(cfg).await?))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

// ================= 行 <-> 领域类型 =================

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ts(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StoreError::Corrupt(format!("timestamp {} out of range", ms)))
}

fn from_opt_ts(ms: Option<i64>) -> StoreResult<Option<DateTime<Utc>>> {
    ms.map(from_ts).transpose()
}

fn to_game(m: game::Model) -> StoreResult<Game> {
    Ok(Game {
        id: m.id,
        chat_id: m.chat_id,
        status: m.status.parse().map_err(StoreError::Corrupt)?,
        target_hash: m.target_hash,
        salt: m.salt,
        number: m.number,
        created_at: from_ts(m.created_at)?,
        finished_at: from_opt_ts(m.finished_at)?,
        winner_user_id: m.winner_user_id,
        prize_amount: m.prize_amount,
        sponsor: Sponsor {
            name: m.sponsor_name,
            start_message: m.sponsor_start_message,
            end_message: m.sponsor_end_message,
        },
    })
}

fn to_round(m: round::Model) -> StoreResult<Round> {
    Ok(Round {
        id: m.id,
        game_id: m.game_id,
        round_index: m.round_index.max(0) as u32,
        status: m.status.parse().map_err(StoreError::Corrupt)?,
        cost_hint: m.cost_hint.map(|c| c.max(0) as u32),
        started_at: from_opt_ts(m.started_at)?,
        ended_at: from_opt_ts(m.ended_at)?,
        total_guesses: m.total_guesses.max(0) as u32,
    })
}

fn to_guess(m: guess::Model) -> StoreResult<Guess> {
    Ok(Guess {
        id: m.id,
        game_id: m.game_id,
        round_id: m.round_id,
        user_id: m.user_id,
        value: m.value,
        is_correct: m.is_correct,
        created_at: from_ts(m.created_at)?,
    })
}

fn to_participation(m: participation::Model) -> Participation {
    Participation {
        id: m.id,
        game_id: m.game_id,
        round_id: m.round_id,
        user_id: m.user_id,
        guesses_count: m.guesses_count.max(0) as u32,
    }
}

/// 唯一索引冲突 -> Conflict，其余原样返回
fn map_unique(err: DbErr, what: impl FnOnce() -> String) -> StoreError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::Conflict(what()),
        _ => StoreError::Db(err),
    }
}

fn status_strs<S: Copy>(items: &[S], f: fn(&S) -> &'static str) -> Vec<&'static str> {
    items.iter().map(f).collect()
}

impl Store for SqliteStore {
    fn create_game(&self, new: NewGame) -> BoxFuture<'_, StoreResult<Game>> {
        Box::pin(async move {
            let chat_id = new.chat_id;
            let model = game::ActiveModel {
                id: NotSet,
                chat_id: Set(new.chat_id),
                status: Set(GameStatus::GameCommitted.as_str().to_owned()),
                target_hash: Set(new.target_hash),
                salt: Set(new.salt),
                number: Set(new.number),
                created_at: Set(ts(new.created_at)),
                finished_at: Set(None),
                winner_user_id: Set(None),
                prize_amount: Set(new.prize_amount),
                sponsor_name: Set(new.sponsor.name),
                sponsor_start_message: Set(new.sponsor.start_message),
                sponsor_end_message: Set(new.sponsor.end_message),
            }
            .insert(&self.db)
            .await
            .map_err(|e| map_unique(e, || format!("chat {} already has an open game", chat_id)))?;

            to_game(model)
        })
    }

    fn get_game(&self, game_id: i64) -> BoxFuture<'_, StoreResult<Option<Game>>> {
        Box::pin(async move {
            game::Entity::find_by_id(game_id)
                .one(&self.db)
                .await?
                .map(to_game)
                .transpose()
        })
    }

    fn active_game(&self, chat_id: i64) -> BoxFuture<'_, StoreResult<Option<Game>>> {
        Box::pin(async move {
            game::Entity::find()
                .filter(game::Column::ChatId.eq(chat_id))
                .filter(game::Column::Status.is_in(status_strs(&GameStatus::OPEN, GameStatus::as_str)))
                .order_by_desc(game::Column::CreatedAt)
                .order_by_desc(game::Column::Id)
                .one(&self.db)
                .await?
                .map(to_game)
                .transpose()
        })
    }

    fn latest_game(&self, chat_id: i64) -> BoxFuture<'_, StoreResult<Option<Game>>> {
        Box::pin(async move {
            game::Entity::find()
                .filter(game::Column::ChatId.eq(chat_id))
                .order_by_desc(game::Column::Id)
                .one(&self.db)
                .await?
                .map(to_game)
                .transpose()
        })
    }

    fn transition_game(
        &self,
        game_id: i64,
        from: &'static [GameStatus],
        to: GameStatus,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let res = game::Entity::update_many()
                .col_expr(game::Column::Status, Expr::value(to.as_str()))
                .filter(game::Column::Id.eq(game_id))
                .filter(game::Column::Status.is_in(status_strs(from, GameStatus::as_str)))
                .exec(&self.db)
                .await
                .map_err(|e| map_unique(e, || format!("game {} cannot become {}", game_id, to)))?;
            Ok(res.rows_affected > 0)
        })
    }

    fn finish_game(
        &self,
        game_id: i64,
        winner_user_id: Option<i64>,
        finished_at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let res = game::Entity::update_many()
                .col_expr(
                    game::Column::Status,
                    Expr::value(GameStatus::GameFinished.as_str()),
                )
                .col_expr(game::Column::FinishedAt, Expr::value(ts(finished_at)))
                .col_expr(game::Column::WinnerUserId, Expr::value(winner_user_id))
                .filter(game::Column::Id.eq(game_id))
                .filter(game::Column::Status.is_in(status_strs(&GameStatus::OPEN, GameStatus::as_str)))
                .exec(&self.db)
                .await?;
            Ok(res.rows_affected > 0)
        })
    }

    fn create_round(&self, new: NewRound) -> BoxFuture<'_, StoreResult<Round>> {
        Box::pin(async move {
            let (game_id, index) = (new.game_id, new.round_index);
            let model = round::ActiveModel {
                id: NotSet,
                game_id: Set(new.game_id),
                round_index: Set(new.round_index as i32),
                status: Set(RoundStatus::Active.as_str().to_owned()),
                cost_hint: Set(new.cost_hint.map(|c| c as i32)),
                started_at: Set(Some(ts(new.started_at))),
                ended_at: Set(None),
                total_guesses: Set(0),
            }
            .insert(&self.db)
            .await
            .map_err(|e| {
                map_unique(e, || {
                    format!("game {} already has an open round or round {}", game_id, index)
                })
            })?;

            to_round(model)
        })
    }

    fn get_round(&self, round_id: i64) -> BoxFuture<'_, StoreResult<Option<Round>>> {
        Box::pin(async move {
            round::Entity::find_by_id(round_id)
                .one(&self.db)
                .await?
                .map(to_round)
                .transpose()
        })
    }

    fn active_round(&self, game_id: i64) -> BoxFuture<'_, StoreResult<Option<Round>>> {
        Box::pin(async move {
            round::Entity::find()
                .filter(round::Column::GameId.eq(game_id))
                .filter(round::Column::Status.is_in(status_strs(&RoundStatus::OPEN, RoundStatus::as_str)))
                .order_by_desc(round::Column::RoundIndex)
                .one(&self.db)
                .await?
                .map(to_round)
                .transpose()
        })
    }

    fn rounds_for_game(&self, game_id: i64) -> BoxFuture<'_, StoreResult<Vec<Round>>> {
        Box::pin(async move {
            round::Entity::find()
                .filter(round::Column::GameId.eq(game_id))
                .order_by_asc(round::Column::RoundIndex)
                .all(&self.db)
                .await?
                .into_iter()
                .map(to_round)
                .collect()
        })
    }

    fn transition_round(
        &self,
        round_id: i64,
        from: &'static [RoundStatus],
        to: RoundStatus,
        ended_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let mut update = round::Entity::update_many()
                .col_expr(round::Column::Status, Expr::value(to.as_str()));
            if let Some(at) = ended_at {
                update = update.col_expr(round::Column::EndedAt, Expr::value(ts(at)));
            }
            let res = update
                .filter(round::Column::Id.eq(round_id))
                .filter(round::Column::Status.is_in(status_strs(from, RoundStatus::as_str)))
                .exec(&self.db)
                .await
                .map_err(|e| map_unique(e, || format!("round {} cannot become {}", round_id, to)))?;
            Ok(res.rows_affected > 0)
        })
    }

    fn record_guess(&self, new: NewGuess, limit: u32) -> BoxFuture<'_, StoreResult<GuessRecord>> {
        Box::pin(async move {
            // 未提交的事务在 drop 时回滚
            let txn = self.db.begin().await?;

            let round = round::Entity::find_by_id(new.round_id).one(&txn).await?;
            match round {
                Some(r) if r.game_id == new.game_id && r.status == RoundStatus::Active.as_str() => {}
                _ => return Ok(GuessRecord::RoundNotActive),
            }
            // 已结束的游戏不再接受猜测
            let game = game::Entity::find_by_id(new.game_id).one(&txn).await?;
            match game {
                Some(g) if GameStatus::OPEN.iter().any(|s| s.as_str() == g.status) => {}
                _ => return Ok(GuessRecord::RoundNotActive),
            }

            let used = guess::Entity::find()
                .filter(guess::Column::RoundId.eq(new.round_id))
                .filter(guess::Column::UserId.eq(new.user_id))
                .count(&txn)
                .await?;
            if used >= u64::from(limit) {
                return Ok(GuessRecord::LimitReached);
            }

            let model = guess::ActiveModel {
                id: NotSet,
                game_id: Set(new.game_id),
                round_id: Set(new.round_id),
                user_id: Set(new.user_id),
                value: Set(new.value),
                is_correct: Set(new.is_correct),
                created_at: Set(ts(new.created_at)),
            }
            .insert(&txn)
            .await?;

            round::Entity::update_many()
                .col_expr(
                    round::Column::TotalGuesses,
                    Expr::col(round::Column::TotalGuesses).add(1),
                )
                .filter(round::Column::Id.eq(new.round_id))
                .exec(&txn)
                .await?;

            participation::Entity::insert(participation::ActiveModel {
                id: NotSet,
                game_id: Set(new.game_id),
                round_id: Set(new.round_id),
                user_id: Set(new.user_id),
                guesses_count: Set(1),
            })
            .on_conflict(
                OnConflict::columns([
                    participation::Column::GameId,
                    participation::Column::RoundId,
                    participation::Column::UserId,
                ])
                .value(
                    participation::Column::GuessesCount,
                    Expr::col(participation::Column::GuessesCount).add(1),
                )
                .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

            let round_total = round::Entity::find_by_id(new.round_id)
                .one(&txn)
                .await?
                .map(|r| r.total_guesses.max(0) as u32)
                .unwrap_or(0);

            txn.commit().await?;

            Ok(GuessRecord::Recorded {
                guess: to_guess(model)?,
                round_total,
            })
        })
    }

    fn user_guesses_in_round(
        &self,
        round_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StoreResult<Vec<Guess>>> {
        Box::pin(async move {
            guess::Entity::find()
                .filter(guess::Column::RoundId.eq(round_id))
                .filter(guess::Column::UserId.eq(user_id))
                .order_by_asc(guess::Column::CreatedAt)
                .order_by_asc(guess::Column::Id)
                .all(&self.db)
                .await?
                .into_iter()
                .map(to_guess)
                .collect()
        })
    }

    fn last_guess(&self, round_id: i64) -> BoxFuture<'_, StoreResult<Option<Guess>>> {
        Box::pin(async move {
            guess::Entity::find()
                .filter(guess::Column::RoundId.eq(round_id))
                .order_by_desc(guess::Column::CreatedAt)
                .order_by_desc(guess::Column::Id)
                .one(&self.db)
                .await?
                .map(to_guess)
                .transpose()
        })
    }

    fn participation(
        &self,
        round_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StoreResult<Option<Participation>>> {
        Box::pin(async move {
            Ok(participation::Entity::find()
                .filter(participation::Column::RoundId.eq(round_id))
                .filter(participation::Column::UserId.eq(user_id))
                .one(&self.db)
                .await?
                .map(to_participation))
        })
    }

    fn participated_round_indices(
        &self,
        game_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StoreResult<Vec<u32>>> {
        Box::pin(async move {
            let round_ids: Vec<i64> = participation::Entity::find()
                .filter(participation::Column::GameId.eq(game_id))
                .filter(participation::Column::UserId.eq(user_id))
                .filter(participation::Column::GuessesCount.gt(0))
                .all(&self.db)
                .await?
                .into_iter()
                .map(|p| p.round_id)
                .collect();

            if round_ids.is_empty() {
                return Ok(Vec::new());
            }

            let mut indices: Vec<u32> = round::Entity::find()
                .filter(round::Column::Id.is_in(round_ids))
                .all(&self.db)
                .await?
                .into_iter()
                .map(|r| r.round_index.max(0) as u32)
                .collect();
            indices.sort_unstable();
            indices.dedup();
            Ok(indices)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn store() -> SqliteStore {
        let db = db::connect("sqlite::memory:", 1).await.unwrap();
        db::init_schema(&db).await.unwrap();
        SqliteStore::new(db)
    }

    fn new_game(chat_id: i64) -> NewGame {
        NewGame {
            chat_id,
            target_hash: "hash".into(),
            salt: "salt".into(),
            number: 77,
            created_at: Utc::now(),
            prize_amount: Some(1000.0),
            sponsor: Sponsor {
                name: Some("Acme".into()),
                start_message: None,
                end_message: Some("bye".into()),
            },
        }
    }

    fn new_round(game_id: i64, round_index: u32) -> NewRound {
        NewRound {
            game_id,
            round_index,
            cost_hint: Some(1),
            started_at: Utc::now(),
        }
    }

    fn new_guess(game_id: i64, round_id: i64, user_id: i64, value: i64) -> NewGuess {
        NewGuess {
            game_id,
            round_id,
            user_id,
            value,
            is_correct: value == 77,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn game_round_trip_and_open_game_uniqueness() {
        let store = store().await;
        let game = store.create_game(new_game(-5)).await.unwrap();
        assert_eq!(game.status, GameStatus::GameCommitted);
        assert_eq!(game.sponsor.end_message.as_deref(), Some("bye"));

        let loaded = store.get_game(game.id).await.unwrap().unwrap();
        assert_eq!(loaded.number, 77);
        assert_eq!(loaded.prize_amount, Some(1000.0));

        let dup = store.create_game(new_game(-5)).await;
        assert!(matches!(dup, Err(StoreError::Conflict(_))));

        // 另一个聊天不受影响
        store.create_game(new_game(-6)).await.unwrap();

        assert!(
            store
                .transition_game(game.id, &[GameStatus::GameCommitted], GameStatus::GameCanceled)
                .await
                .unwrap()
        );
        assert!(store.active_game(-5).await.unwrap().is_none());
        assert_eq!(store.latest_game(-5).await.unwrap().unwrap().id, game.id);
        store.create_game(new_game(-5)).await.unwrap();
    }

    #[tokio::test]
    async fn conditional_transitions() {
        let store = store().await;
        let game = store.create_game(new_game(1)).await.unwrap();
        let round = store.create_round(new_round(game.id, 1)).await.unwrap();

        assert!(
            !store
                .transition_round(round.id, &[RoundStatus::Paused], RoundStatus::Active, None)
                .await
                .unwrap()
        );
        assert!(
            store
                .transition_round(round.id, &RoundStatus::OPEN, RoundStatus::Closed, Some(Utc::now()))
                .await
                .unwrap()
        );
        let closed = store.get_round(round.id).await.unwrap().unwrap();
        assert_eq!(closed.status, RoundStatus::Closed);
        assert!(closed.ended_at.is_some());

        assert!(store.finish_game(game.id, Some(9), Utc::now()).await.unwrap());
        assert!(!store.finish_game(game.id, Some(10), Utc::now()).await.unwrap());
        let finished = store.get_game(game.id).await.unwrap().unwrap();
        assert_eq!(finished.winner_user_id, Some(9));
    }

    #[tokio::test]
    async fn one_open_round_per_game() {
        let store = store().await;
        let game = store.create_game(new_game(1)).await.unwrap();
        let first = store.create_round(new_round(game.id, 1)).await.unwrap();

        assert!(matches!(
            store.create_round(new_round(game.id, 2)).await,
            Err(StoreError::Conflict(_))
        ));

        store
            .transition_round(first.id, &RoundStatus::OPEN, RoundStatus::Closed, Some(Utc::now()))
            .await
            .unwrap();
        assert!(matches!(
            store.create_round(new_round(game.id, 1)).await,
            Err(StoreError::Conflict(_))
        ));
        let second = store.create_round(new_round(game.id, 2)).await.unwrap();
        assert_eq!(store.active_round(game.id).await.unwrap().unwrap().id, second.id);

        let indices: Vec<u32> = store
            .rounds_for_game(game.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.round_index)
            .collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[tokio::test]
    async fn record_guess_counts_and_limits() {
        let store = store().await;
        let game = store.create_game(new_game(1)).await.unwrap();
        let round = store.create_round(new_round(game.id, 1)).await.unwrap();

        for value in [10, 20] {
            let rec = store
                .record_guess(new_guess(game.id, round.id, 42, value), 2)
                .await
                .unwrap();
            assert!(matches!(rec, GuessRecord::Recorded { .. }));
        }
        assert_eq!(
            store
                .record_guess(new_guess(game.id, round.id, 42, 30), 2)
                .await
                .unwrap(),
            GuessRecord::LimitReached
        );

        let rec = store
            .record_guess(new_guess(game.id, round.id, 43, 77), 2)
            .await
            .unwrap();
        match rec {
            GuessRecord::Recorded { guess, round_total } => {
                assert!(guess.is_correct);
                assert_eq!(round_total, 3);
            }
            other => panic!("unexpected {:?}", other),
        }

        let p = store.participation(round.id, 42).await.unwrap().unwrap();
        assert_eq!(p.guesses_count, 2);
        assert_eq!(store.user_guesses_in_round(round.id, 42).await.unwrap().len(), 2);
        assert_eq!(store.last_guess(round.id).await.unwrap().unwrap().value, 77);
        assert_eq!(store.get_round(round.id).await.unwrap().unwrap().total_guesses, 3);
    }

    #[tokio::test]
    async fn record_guess_requires_active_round() {
        let store = store().await;
        let game = store.create_game(new_game(1)).await.unwrap();
        let round = store.create_round(new_round(game.id, 1)).await.unwrap();
        store
            .transition_round(round.id, &[RoundStatus::Active], RoundStatus::Paused, None)
            .await
            .unwrap();

        assert_eq!(
            store
                .record_guess(new_guess(game.id, round.id, 1, 5), 10)
                .await
                .unwrap(),
            GuessRecord::RoundNotActive
        );
        assert!(store.last_guess(round.id).await.unwrap().is_none());
        assert_eq!(store.get_round(round.id).await.unwrap().unwrap().total_guesses, 0);
    }

    #[tokio::test]
    async fn record_guess_rejects_finished_game() {
        let store = store().await;
        let game = store.create_game(new_game(1)).await.unwrap();
        let round = store.create_round(new_round(game.id, 1)).await.unwrap();
        // 回合仍为 ACTIVE，但游戏已经结束
        assert!(store.finish_game(game.id, None, Utc::now()).await.unwrap());

        assert_eq!(
            store
                .record_guess(new_guess(game.id, round.id, 1, 5), 10)
                .await
                .unwrap(),
            GuessRecord::RoundNotActive
        );
        assert!(store.last_guess(round.id).await.unwrap().is_none());
        assert!(store.participation(round.id, 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn participated_indices() {
        let store = store().await;
        let game = store.create_game(new_game(1)).await.unwrap();

        let r1 = store.create_round(new_round(game.id, 1)).await.unwrap();
        store
            .transition_round(r1.id, &RoundStatus::OPEN, RoundStatus::Closed, Some(Utc::now()))
            .await
            .unwrap();
        let r2 = store.create_round(new_round(game.id, 2)).await.unwrap();
        store
            .record_guess(new_guess(game.id, r2.id, 8, 1), 10)
            .await
            .unwrap();
        store
            .record_guess(new_guess(game.id, r2.id, 8, 2), 10)
            .await
            .unwrap();

        assert_eq!(
            store.participated_round_indices(game.id, 8).await.unwrap(),
            vec![2]
        );
        assert!(
            store
                .participated_round_indices(game.id, 9)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
