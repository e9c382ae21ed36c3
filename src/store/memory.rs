use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{GuessRecord, Store, StoreResult};
use crate::error::StoreError;
use crate::model::{
    Game, GameStatus, Guess, NewGame, NewGuess, NewRound, Participation, Round, RoundStatus,
};

#[derive(Default)]
struct Tables {
    games: BTreeMap<i64, Game>,
    rounds: BTreeMap<i64, Round>,
    guesses: Vec<Guess>,
    participations: Vec<Participation>,
    last_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

/// 进程内存储，所有操作在同一把锁内完成
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn create_game(&self, new: NewGame) -> BoxFuture<'_, StoreResult<Game>> {
        Box::pin(async move {
            let mut t = self.tables.lock().await;
            if t
                .games
                .values()
                .any(|g| g.chat_id == new.chat_id && !g.status.is_terminal())
            {
                return Err(StoreError::Conflict(format!(
                    "chat {} already has an open game",
                    new.chat_id
                )));
            }

            let game = Game {
                id: t.next_id(),
                chat_id: new.chat_id,
                status: GameStatus::GameCommitted,
                target_hash: new.target_hash,
                salt: new.salt,
                number: new.number,
                created_at: new.created_at,
                finished_at: None,
                winner_user_id: None,
                prize_amount: new.prize_amount,
                sponsor: new.sponsor,
            };
            t.games.insert(game.id, game.clone());
            Ok(game)
        })
    }

    fn get_game(&self, game_id: i64) -> BoxFuture<'_, StoreResult<Option<Game>>> {
        Box::pin(async move { Ok(self.tables.lock().await.games.get(&game_id).cloned()) })
    }

    fn active_game(&self, chat_id: i64) -> BoxFuture<'_, StoreResult<Option<Game>>> {
        Box::pin(async move {
            let t = self.tables.lock().await;
            Ok(t.games
                .values()
                .rev()
                .find(|g| g.chat_id == chat_id && !g.status.is_terminal())
                .cloned())
        })
    }

    fn latest_game(&self, chat_id: i64) -> BoxFuture<'_, StoreResult<Option<Game>>> {
        Box::pin(async move {
            let t = self.tables.lock().await;
            Ok(t.games.values().rev().find(|g| g.chat_id == chat_id).cloned())
        })
    }

    fn transition_game(
        &self,
        game_id: i64,
        from: &'static [GameStatus],
        to: GameStatus,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let mut t = self.tables.lock().await;
            match t.games.get_mut(&game_id) {
                Some(game) if from.contains(&game.status) => {
                    game.status = to;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn finish_game(
        &self,
        game_id: i64,
        winner_user_id: Option<i64>,
        finished_at: DateTime<Utc>,
    ) -> BoxFuture<'_, StoreResult<bool>> {
        Box::pin(async move {
            let mut t = self.tables.lock().await;
            match t.games.get_mut(&game_id) {
                Some(game) if !game.status.is_terminal() => {
                    game.status = GameStatus::GameFinished;
                    game.finished_at = Some(finished_at);
                    game.winner_user_id = winner_user_id;
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn create_round(&self, new: NewRound) -> BoxFuture<'_, StoreResult<Round>> {
        Box::pin(async move {
            let mut t = self.tables.lock().await;
            if t.rounds.values().any(|r| {
                r.game_id == new.game_id && (r.status.is_open() || r.round_index == new.round_index)
            }) {
                return Err(StoreError::Conflict(format!(
                    "game {} already has an open round or round {}",
                    new.game_id, new.round_index
                )));
            }

            let round = Round {
                id: t.next_id(),
                game_id: new.game_id,
                round_index: new.round_index,
                status: RoundStatus::Active,
                cost_hint: new.cost_hint,
                started_at: Some(new.started_at),
                ended_at: None,
                total_guesses: 0,
            };
            t.rounds.insert(round.id, round.clone());
            Ok(round)
        })
    }

    fn get_round(&self, round_id: i64) -> BoxFuture<'_, StoreResult<Option<Round>>> {
        Box::pin(async move { Ok(self.tables.lock().await.rounds.get(&round_id).cloned()) })
    }

    fn active_round(&self, game_id: i64) -> BoxFuture<'_, StoreResult<Option<Round>>> {
        Box::pin(async move {
            let t = self.tables.lock().await;
            Ok(t.rounds
                .values()
                .filter(|r| r.game_id == game_id && r.status.is_open())
                .max_by_key(|r| r.round_index)
                .cloned())
        })
    }

    fn rounds_for_game(&self, game_id: i64) -> BoxFuture<'_, StoreResult<Vec<Round>>> {
        Box::pin(async move {
            let t = self.tables.lock().await;
            let mut rounds: Vec<Round> = t
                .rounds
                .values()
                .filter(|r| r.game_id == game_id)
                .cloned()
                .collect();
            rounds.sort_by_key(|r| r.round_index);
            Ok(rounds)
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
            let mut t = self.tables.lock().await;
            match t.rounds.get_mut(&round_id) {
                Some(round) if from.contains(&round.status) => {
                    round.status = to;
                    if ended_at.is_some() {
                        round.ended_at = ended_at;
                    }
                    Ok(true)
                }
                _ => Ok(false),
            }
        })
    }

    fn record_guess(&self, new: NewGuess, limit: u32) -> BoxFuture<'_, StoreResult<GuessRecord>> {
        Box::pin(async move {
            let mut t = self.tables.lock().await;

            match t.rounds.get(&new.round_id) {
                Some(r) if r.game_id == new.game_id && r.status == RoundStatus::Active => {}
                _ => return Ok(GuessRecord::RoundNotActive),
            }
            match t.games.get(&new.game_id) {
                Some(g) if GameStatus::OPEN.contains(&g.status) => {}
                _ => return Ok(GuessRecord::RoundNotActive),
            }

            let used = t
                .guesses
                .iter()
                .filter(|g| g.round_id == new.round_id && g.user_id == new.user_id)
                .count() as u32;
            if used >= limit {
                return Ok(GuessRecord::LimitReached);
            }

            let guess = Guess {
                id: t.next_id(),
                game_id: new.game_id,
                round_id: new.round_id,
                user_id: new.user_id,
                value: new.value,
                is_correct: new.is_correct,
                created_at: new.created_at,
            };
            t.guesses.push(guess.clone());

            let round_total = match t.rounds.get_mut(&new.round_id) {
                Some(round) => {
                    round.total_guesses += 1;
                    round.total_guesses
                }
                None => 0,
            };

            let existing = t
                .participations
                .iter()
                .position(|p| p.round_id == new.round_id && p.user_id == new.user_id);
            match existing {
                Some(pos) => t.participations[pos].guesses_count += 1,
                None => {
                    let id = t.next_id();
                    t.participations.push(Participation {
                        id,
                        game_id: new.game_id,
                        round_id: new.round_id,
                        user_id: new.user_id,
                        guesses_count: 1,
                    });
                }
            }

            Ok(GuessRecord::Recorded { guess, round_total })
        })
    }

    fn user_guesses_in_round(
        &self,
        round_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StoreResult<Vec<Guess>>> {
        Box::pin(async move {
            let t = self.tables.lock().await;
            Ok(t.guesses
                .iter()
                .filter(|g| g.round_id == round_id && g.user_id == user_id)
                .cloned()
                .collect())
        })
    }

    fn last_guess(&self, round_id: i64) -> BoxFuture<'_, StoreResult<Option<Guess>>> {
        Box::pin(async move {
            let t = self.tables.lock().await;
            Ok(t.guesses.iter().rev().find(|g| g.round_id == round_id).cloned())
        })
    }

    fn participation(
        &self,
        round_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StoreResult<Option<Participation>>> {
        Box::pin(async move {
            let t = self.tables.lock().await;
            Ok(t.participations
                .iter()
                .find(|p| p.round_id == round_id && p.user_id == user_id)
                .cloned())
        })
    }

    fn participated_round_indices(
        &self,
        game_id: i64,
        user_id: i64,
    ) -> BoxFuture<'_, StoreResult<Vec<u32>>> {
        Box::pin(async move {
            let t = self.tables.lock().await;
            let mut indices: Vec<u32> = t
                .participations
                .iter()
                .filter(|p| p.game_id == game_id && p.user_id == user_id && p.guesses_count > 0)
                .filter_map(|p| t.rounds.get(&p.round_id).map(|r| r.round_index))
                .collect();
            indices.sort_unstable();
            indices.dedup();
            Ok(indices)
        })
    }
}
