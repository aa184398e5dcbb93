use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{DrawingId, Game, InternalId};

/// How many recent scores an account keeps per game.
pub const RECENT_SCORES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Deleted,
}

/// A profile value with its own visibility flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileField {
    pub value: String,
    pub public: bool,
}

impl ProfileField {
    /// The value as seen by someone other than the owner.
    #[must_use]
    pub fn visible(&self) -> Option<&str> {
        self.public.then_some(self.value.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub name: ProfileField,
    pub email: ProfileField,
    pub color: ProfileField,
    pub about: ProfileField,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameStats {
    /// Most recent last.
    pub scores: Vec<i64>,
    pub high_score: i64,
    pub plays: u64,
}

impl GameStats {
    pub fn record(&mut self, score: i64) {
        self.scores.push(score);
        if self.scores.len() > RECENT_SCORES {
            let excess = self.scores.len() - RECENT_SCORES;
            self.scores.drain(..excess);
        }
        if self.plays == 0 || score > self.high_score {
            self.high_score = score;
        }
        self.plays += 1;
    }
}

/// One record of the users collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub internal_id: InternalId,
    pub username: String,
    pub password_hash: String,
    pub password_salt: String,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub profile: Profile,
    #[serde(default)]
    pub stats: BTreeMap<Game, GameStats>,
    #[serde(default)]
    pub drawing_count: u64,
    #[serde(default)]
    pub post_count: u64,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub liked_drawings: Vec<DrawingId>,
    pub created_at: String,
    pub updated_at: String,
}

impl Account {
    #[must_use]
    pub fn new(username: String, password_hash: String, password_salt: String) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            internal_id: InternalId::generate(),
            username,
            password_hash,
            password_salt,
            status: AccountStatus::Active,
            profile: Profile::default(),
            stats: BTreeMap::new(),
            drawing_count: 0,
            post_count: 0,
            comment_count: 0,
            liked_drawings: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }

    /// Usernames compare case-insensitively.
    #[must_use]
    pub fn has_username(&self, username: &str) -> bool {
        self.username.to_lowercase() == username.to_lowercase()
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// The users collection, keyed by internal id.
pub type Accounts = BTreeMap<InternalId, Account>;

/// True if any record physically present holds `username`, whatever its
/// status. Soft-deleted accounts keep their name reserved until purged.
#[must_use]
pub fn username_taken(accounts: &Accounts, username: &str, except: Option<InternalId>) -> bool {
    accounts
        .values()
        .any(|a| Some(a.internal_id) != except && a.has_username(username))
}
