//! Domain service for accounts and bearer-token authentication.
//!
//! Handles account creation, login, profile updates, renames and the two-stage
//! deletion (soft delete, then purge with cascade).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::auth::{Claims, TokenError};
use crate::domain::{DrawingId, Game, InternalId};
use crate::identity::IdentityError;
use crate::models::{Account, GameStats, ProfileField};
use crate::services::cascade::CascadeReport;
use crate::store::StoreError;

/// Errors specific to account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Username already exists")]
    UsernameExists,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User not found")]
    NotFound,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<anyhow::Error> for AccountError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<IdentityError> for AccountError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::UnknownUsername(_) | IdentityError::UnknownId(_) => Self::NotFound,
            IdentityError::Store(e) => Self::Store(e),
        }
    }
}

/// Login result carrying a fresh token.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    pub username: String,
    pub token: String,
    pub expires_at: i64,
}

/// A profile field update: `None` leaves that half unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileFieldUpdate {
    pub value: Option<String>,
    pub public: Option<bool>,
}

impl ProfileFieldUpdate {
    pub(crate) fn apply(self, field: &mut ProfileField) {
        if let Some(value) = self.value {
            field.value = value;
        }
        if let Some(public) = self.public {
            field.public = public;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountUpdate {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Required together with `password`.
    pub current_password: Option<String>,
    pub name: Option<ProfileFieldUpdate>,
    pub email: Option<ProfileFieldUpdate>,
    pub color: Option<ProfileFieldUpdate>,
    pub about: Option<ProfileFieldUpdate>,
}

/// Outcome of an update. A rename comes with a token for the new name.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateResult {
    pub account: AccountView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// The owner's full view of their account, without credentials.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub username: String,
    pub name: ProfileField,
    pub email: ProfileField,
    pub color: ProfileField,
    pub about: ProfileField,
    pub stats: BTreeMap<Game, GameStats>,
    pub drawing_count: u64,
    pub post_count: u64,
    pub comment_count: u64,
    pub liked_drawings: Vec<DrawingId>,
    pub created_at: String,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            username: account.username.clone(),
            name: account.profile.name.clone(),
            email: account.profile.email.clone(),
            color: account.profile.color.clone(),
            about: account.profile.about.clone(),
            stats: account.stats.clone(),
            drawing_count: account.drawing_count,
            post_count: account.post_count,
            comment_count: account.comment_count,
            liked_drawings: account.liked_drawings.clone(),
            created_at: account.created_at.clone(),
        }
    }
}

/// What everyone else sees: private profile fields are omitted.
#[derive(Debug, Clone, Serialize)]
pub struct PublicProfile {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
    pub stats: BTreeMap<Game, GameStats>,
    pub drawing_count: u64,
    pub post_count: u64,
    pub comment_count: u64,
    pub created_at: String,
}

impl From<&Account> for PublicProfile {
    fn from(account: &Account) -> Self {
        let visible = |field: &ProfileField| field.visible().map(str::to_string);
        Self {
            username: account.username.clone(),
            name: visible(&account.profile.name),
            email: visible(&account.profile.email),
            color: visible(&account.profile.color),
            about: visible(&account.profile.about),
            stats: account.stats.clone(),
            drawing_count: account.drawing_count,
            post_count: account.post_count,
            comment_count: account.comment_count,
            created_at: account.created_at.clone(),
        }
    }
}

/// Domain service trait for accounts.
#[async_trait::async_trait]
pub trait AccountService: Send + Sync {
    /// Creates an active account with a fresh internal id.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::UsernameExists`] if any stored record, active or
    /// soft-deleted, already holds the name (case-insensitively).
    async fn create_account(&self, username: &str, password: &str)
    -> Result<AccountView, AccountError>;

    /// Verifies the password and issues a token.
    ///
    /// # Errors
    ///
    /// Returns [`AccountError::InvalidCredentials`] for unknown, deleted or
    /// wrong-password logins alike.
    async fn login(&self, username: &str, password: &str) -> Result<LoginResult, AccountError>;

    /// Signs a token for `username`, valid from now for the configured TTL.
    fn issue_token(&self, username: &str) -> String;

    /// Checks a presented token; `None` means no token was sent.
    fn verify_token(&self, token: Option<&str>) -> Result<Claims, TokenError>;

    /// Verifies the token and loads the active account it names. A token whose
    /// username no longer resolves is refused as [`TokenError::Missing`].
    async fn authenticate(&self, token: Option<&str>) -> Result<Account, AccountError>;

    async fn get_account(&self, id: InternalId) -> Result<AccountView, AccountError>;

    async fn get_public_profile(&self, username: &str) -> Result<PublicProfile, AccountError>;

    /// Applies profile, password and username changes in one locked write.
    ///
    /// # Errors
    ///
    /// - [`AccountError::UsernameExists`] when renaming onto a taken name
    /// - [`AccountError::InvalidCredentials`] when `current_password` is wrong
    async fn update_account(
        &self,
        id: InternalId,
        update: AccountUpdate,
    ) -> Result<UpdateResult, AccountError>;

    /// Marks the account deleted. Login stops working; the name stays reserved.
    async fn soft_delete(&self, id: InternalId) -> Result<(), AccountError>;

    /// Removes the account and every reference to it in the other stores.
    async fn hard_delete(&self, id: InternalId) -> CascadeReport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_profile_hides_private_fields() {
        let mut account = Account::new("alice".to_string(), "h".to_string(), "s".to_string());
        account.profile.name = ProfileField {
            value: "Alice".to_string(),
            public: true,
        };
        account.profile.email = ProfileField {
            value: "alice@example.com".to_string(),
            public: false,
        };

        let profile = PublicProfile::from(&account);
        assert_eq!(profile.name.as_deref(), Some("Alice"));
        assert_eq!(profile.email, None);

        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("email").is_none());
        assert!(json.get("password_hash").is_none());
    }

    #[test]
    fn field_update_changes_only_given_halves() {
        let mut field = ProfileField {
            value: "old".to_string(),
            public: true,
        };
        ProfileFieldUpdate {
            value: None,
            public: Some(false),
        }
        .apply(&mut field);
        assert_eq!(field.value, "old");
        assert!(!field.public);
    }

    #[test]
    fn identity_errors_map_to_not_found() {
        let err = AccountError::from(IdentityError::UnknownUsername("x".to_string()));
        assert!(matches!(err, AccountError::NotFound));
    }
}
