use serde::{Deserialize, Serialize};

use crate::domain::InternalId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub player_id: InternalId,
    pub score: i64,
    pub recorded_at: String,
}

/// One game's leaderboard collection, in submission order.
pub type Leaderboard = Vec<LeaderboardEntry>;
