//! Username ⇄ internal id translation.
//!
//! This is the one place where the mutable display name meets the immutable
//! storage key. Other stores keep only [`InternalId`]s and come here to turn
//! them into names on the way out, so a rename never has to touch them.

use std::collections::HashMap;
use thiserror::Error;

use crate::domain::InternalId;
use crate::models::{Account, Accounts};
use crate::store::{RecordStore, StoreError, collection};

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("User '{0}' not found")]
    UnknownUsername(String),

    #[error("Account {0} not found")]
    UnknownId(InternalId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Case-insensitive lookup among active accounts only.
#[must_use]
pub fn find_active<'a>(accounts: &'a Accounts, username: &str) -> Option<&'a Account> {
    accounts
        .values()
        .find(|a| a.is_active() && a.has_username(username))
}

/// Id → current username for every active account, taken from one snapshot.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    names: HashMap<InternalId, String>,
}

impl Directory {
    #[must_use]
    pub fn from_accounts(accounts: &Accounts) -> Self {
        let names = accounts
            .values()
            .filter(|a| a.is_active())
            .map(|a| (a.internal_id, a.username.clone()))
            .collect();
        Self { names }
    }

    /// `None` for ids that were deleted or never existed; callers skip those.
    #[must_use]
    pub fn username(&self, id: &InternalId) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }
}

/// Reads go through lock-free snapshots and may trail a concurrent rename.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    store: RecordStore,
}

impl IdentityResolver {
    #[must_use]
    pub const fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub async fn resolve_id(&self, username: &str) -> Result<InternalId, IdentityError> {
        let accounts = self.store.snapshot(&collection::users()).await?;
        find_active(&accounts, username)
            .map(|a| a.internal_id)
            .ok_or_else(|| IdentityError::UnknownUsername(username.to_string()))
    }

    pub async fn resolve_username(&self, id: InternalId) -> Result<String, IdentityError> {
        let accounts = self.store.snapshot(&collection::users()).await?;
        accounts
            .get(&id)
            .filter(|a| a.is_active())
            .map(|a| a.username.clone())
            .ok_or(IdentityError::UnknownId(id))
    }

    /// Active account for `username`, for handlers that need more than the id.
    pub async fn resolve_account(&self, username: &str) -> Result<Account, IdentityError> {
        let accounts = self.store.snapshot(&collection::users()).await?;
        find_active(&accounts, username)
            .cloned()
            .ok_or_else(|| IdentityError::UnknownUsername(username.to_string()))
    }

    pub async fn resolve_many(&self) -> Result<Directory, StoreError> {
        let accounts = self.store.snapshot(&collection::users()).await?;
        Ok(Directory::from_accounts(&accounts))
    }
}
