//! Game scores: per-game leaderboards plus the per-account stats they feed.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

use crate::domain::{Game, InternalId};
use crate::identity::IdentityResolver;
use crate::models::{GameStats, Leaderboard, LeaderboardEntry};
use crate::services::update_active_account;
use crate::store::{RecordStore, StoreError, collection};

pub const DEFAULT_LEADERBOARD_SIZE: usize = 10;
pub const MAX_LEADERBOARD_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("{0}")]
    UnknownGame(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Player not found")]
    PlayerNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Returned to the player after a submission.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReceipt {
    pub game: Game,
    pub score: i64,
    pub stats: GameStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedScore {
    pub rank: usize,
    pub username: String,
    pub score: i64,
    pub recorded_at: String,
}

#[derive(Clone)]
pub struct LeaderboardService {
    store: RecordStore,
    identity: IdentityResolver,
}

impl LeaderboardService {
    #[must_use]
    pub const fn new(store: RecordStore, identity: IdentityResolver) -> Self {
        Self { store, identity }
    }

    pub fn parse_game(game: &str) -> Result<Game, GameError> {
        game.parse().map_err(GameError::UnknownGame)
    }

    /// Appends the score to the game's board, then folds it into the player's
    /// stats. The two writes take their locks one after the other.
    ///
    /// The player is checked while the board lock is held. A purge removes the
    /// account before it scrubs the boards, so an entry written here is either
    /// rejected or seen by the scrub.
    pub async fn submit_score(
        &self,
        player: InternalId,
        game: Game,
        score: i64,
    ) -> Result<ScoreReceipt, GameError> {
        if score < 0 {
            return Err(GameError::Validation("Score cannot be negative".to_string()));
        }

        let entry = LeaderboardEntry {
            player_id: player,
            score,
            recorded_at: chrono::Utc::now().to_rfc3339(),
        };
        let identity = self.identity.clone();
        let player_active = async move {
            let directory = identity.resolve_many().await?;
            Ok::<_, GameError>(directory.username(&player).is_some())
        };
        self.store
            .with_exclusive_lock_after(
                &collection::leaderboard(game),
                player_active,
                move |board: &mut Leaderboard, active| {
                    if !active {
                        return Err(GameError::PlayerNotFound);
                    }
                    board.push(entry);
                    Ok(())
                },
            )
            .await?;

        let stats = update_active_account(&self.store, player, move |account| {
            let stats = account.stats.entry(game).or_default();
            stats.record(score);
            stats.clone()
        })
        .await?
        .ok_or(GameError::PlayerNotFound)?;

        info!(player = %player, game = %game, score, "Score recorded");
        Ok(ScoreReceipt { game, score, stats })
    }

    /// Best score per player, highest first. Entries whose player no longer
    /// resolves are left out, even before the cascade has scrubbed them.
    pub async fn top(&self, game: Game, limit: usize) -> Result<Vec<RankedScore>, GameError> {
        let limit = limit.clamp(1, MAX_LEADERBOARD_SIZE);
        let board = self.store.snapshot(&collection::leaderboard(game)).await?;
        let directory = self.identity.resolve_many().await?;

        Ok(rank(board, limit, |id| directory.username(id).map(str::to_string)))
    }
}

fn rank(
    board: Leaderboard,
    limit: usize,
    username: impl Fn(&InternalId) -> Option<String>,
) -> Vec<RankedScore> {
    let mut best: HashMap<InternalId, LeaderboardEntry> = HashMap::new();
    for entry in board {
        match best.get(&entry.player_id) {
            Some(kept) if kept.score >= entry.score => {}
            _ => {
                best.insert(entry.player_id, entry);
            }
        }
    }

    let mut entries: Vec<LeaderboardEntry> = best.into_values().collect();
    // Ties go to whoever got there first.
    entries.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.recorded_at.cmp(&b.recorded_at))
    });

    entries
        .into_iter()
        .filter_map(|entry| {
            username(&entry.player_id).map(|username| (username, entry))
        })
        .take(limit)
        .enumerate()
        .map(|(i, (username, entry))| RankedScore {
            rank: i + 1,
            username,
            score: entry.score,
            recorded_at: entry.recorded_at,
        })
        .collect()
}
