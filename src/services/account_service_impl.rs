//! Record-store implementation of the `AccountService` trait.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::auth::{self, Claims, TokenCodec, TokenError};
use crate::config::SecurityConfig;
use crate::domain::InternalId;
use crate::identity::{IdentityResolver, find_active};
use crate::models::{Account, Accounts, username_taken};
use crate::services::account_service::{
    AccountError, AccountService, AccountUpdate, AccountView, LoginResult, PublicProfile,
    UpdateResult,
};
use crate::services::cascade::{CascadeReport, DeletionCoordinator};
use crate::store::{RecordStore, collection};

pub const MAX_USERNAME_LENGTH: usize = 32;

/// Usernames appear in URLs, so keep them to a plain alphabet.
pub fn validate_username(username: &str) -> Result<(), AccountError> {
    if username.is_empty() {
        return Err(AccountError::Validation("Username is required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(AccountError::Validation(format!(
            "Username must be at most {MAX_USERNAME_LENGTH} characters"
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AccountError::Validation(
            "Username may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    Ok(())
}

pub struct StoreAccountService {
    store: RecordStore,
    identity: IdentityResolver,
    codec: TokenCodec,
    security: SecurityConfig,
    coordinator: DeletionCoordinator,
}

impl StoreAccountService {
    #[must_use]
    pub const fn new(
        store: RecordStore,
        identity: IdentityResolver,
        codec: TokenCodec,
        security: SecurityConfig,
        coordinator: DeletionCoordinator,
    ) -> Self {
        Self {
            store,
            identity,
            codec,
            security,
            coordinator,
        }
    }

    fn validate_password(&self, password: &str) -> Result<(), AccountError> {
        if password.chars().count() < self.security.min_password_length {
            return Err(AccountError::Validation(format!(
                "Password must be at least {} characters",
                self.security.min_password_length
            )));
        }
        Ok(())
    }

    async fn active_account(&self, id: InternalId) -> Result<Account, AccountError> {
        let accounts = self.store.snapshot(&collection::users()).await?;
        accounts
            .get(&id)
            .filter(|a| a.is_active())
            .cloned()
            .ok_or(AccountError::NotFound)
    }
}

#[async_trait]
impl AccountService for StoreAccountService {
    async fn create_account(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AccountView, AccountError> {
        validate_username(username)?;
        self.validate_password(password)?;

        // Hash outside the lock; Argon2 is slow.
        let hashed = auth::hash_password_blocking(password, &self.security).await?;
        let account = Account::new(username.to_string(), hashed.hash, hashed.salt);

        let view = self
            .store
            .with_exclusive_lock(&collection::users(), move |accounts: &mut Accounts| {
                if username_taken(accounts, &account.username, None) {
                    return Err(AccountError::UsernameExists);
                }
                let view = AccountView::from(&account);
                accounts.insert(account.internal_id, account);
                Ok(view)
            })
            .await?;

        info!(username = %view.username, "Account created");
        Ok(view)
    }

    async fn login(&self, username: &str, password: &str) -> Result<LoginResult, AccountError> {
        let account = match self.identity.resolve_account(username).await {
            Ok(account) => account,
            Err(crate::identity::IdentityError::Store(e)) => return Err(e.into()),
            Err(_) => {
                debug!(username, "Login for unknown or deleted account");
                return Err(AccountError::InvalidCredentials);
            }
        };

        if !auth::verify_password_blocking(password, &account.password_hash).await? {
            debug!(username, "Login with wrong password");
            return Err(AccountError::InvalidCredentials);
        }

        let now = auth::unix_now();
        let token = self.codec.issue(&account.username, now);
        info!(username = %account.username, "User logged in");

        Ok(LoginResult {
            username: account.username,
            token,
            expires_at: now + self.codec.ttl_seconds(),
        })
    }

    fn issue_token(&self, username: &str) -> String {
        self.codec.issue(username, auth::unix_now())
    }

    fn verify_token(&self, token: Option<&str>) -> Result<Claims, TokenError> {
        let token = token.ok_or(TokenError::Missing)?;
        self.codec.verify(token, auth::unix_now())
    }

    async fn authenticate(&self, token: Option<&str>) -> Result<Account, AccountError> {
        let claims = self.verify_token(token)?;

        let accounts = self.store.snapshot(&collection::users()).await?;
        find_active(&accounts, &claims.username)
            .cloned()
            .ok_or_else(|| {
                debug!(username = %claims.username, "Token names no active account");
                AccountError::Token(TokenError::Missing)
            })
    }

    async fn get_account(&self, id: InternalId) -> Result<AccountView, AccountError> {
        let account = self.active_account(id).await?;
        Ok(AccountView::from(&account))
    }

    async fn get_public_profile(&self, username: &str) -> Result<PublicProfile, AccountError> {
        let account = self.identity.resolve_account(username).await?;
        Ok(PublicProfile::from(&account))
    }

    async fn update_account(
        &self,
        id: InternalId,
        update: AccountUpdate,
    ) -> Result<UpdateResult, AccountError> {
        let current = self.active_account(id).await?;

        if let Some(username) = &update.username {
            validate_username(username)?;
        }

        // A password change is checked against the hash seen here and only
        // applied if that hash is still in place under the lock.
        let new_password = match &update.password {
            Some(password) => {
                self.validate_password(password)?;
                let Some(current_password) = update.current_password.as_deref() else {
                    return Err(AccountError::Validation(
                        "current_password is required to change the password".to_string(),
                    ));
                };
                if !auth::verify_password_blocking(current_password, &current.password_hash).await?
                {
                    return Err(AccountError::InvalidCredentials);
                }
                let hashed = auth::hash_password_blocking(password, &self.security).await?;
                Some((current.password_hash.clone(), hashed))
            }
            None => None,
        };

        let AccountUpdate {
            username,
            name,
            email,
            color,
            about,
            ..
        } = update;

        let (view, renamed) = self
            .store
            .with_exclusive_lock(&collection::users(), move |accounts: &mut Accounts| {
                let taken = username
                    .as_deref()
                    .is_some_and(|wanted| username_taken(accounts, wanted, Some(id)));

                let account = accounts
                    .get_mut(&id)
                    .filter(|a| a.is_active())
                    .ok_or(AccountError::NotFound)?;

                if let Some((seen_hash, hashed)) = new_password {
                    if account.password_hash != seen_hash {
                        return Err(AccountError::InvalidCredentials);
                    }
                    account.password_hash = hashed.hash;
                    account.password_salt = hashed.salt;
                }

                let mut renamed = false;
                if let Some(new_name) = username
                    && new_name != account.username
                {
                    if taken {
                        return Err(AccountError::UsernameExists);
                    }
                    account.username = new_name;
                    renamed = true;
                }

                if let Some(field) = name {
                    field.apply(&mut account.profile.name);
                }
                if let Some(field) = email {
                    field.apply(&mut account.profile.email);
                }
                if let Some(field) = color {
                    field.apply(&mut account.profile.color);
                }
                if let Some(field) = about {
                    field.apply(&mut account.profile.about);
                }

                account.touch();
                Ok((AccountView::from(&*account), renamed))
            })
            .await?;

        let token = renamed.then(|| {
            info!(from = %current.username, to = %view.username, "Account renamed");
            self.issue_token(&view.username)
        });

        Ok(UpdateResult {
            account: view,
            token,
        })
    }

    async fn soft_delete(&self, id: InternalId) -> Result<(), AccountError> {
        if !self.coordinator.soft_delete(id).await? {
            return Err(AccountError::NotFound);
        }
        Ok(())
    }

    async fn hard_delete(&self, id: InternalId) -> CascadeReport {
        self.coordinator.hard_delete_account(id).await
    }
}
