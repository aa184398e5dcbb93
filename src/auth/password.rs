use anyhow::{Context, Result};
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use tokio::task;

use crate::config::SecurityConfig;

/// Hash plus the salt it was derived with. The PHC hash string embeds the
/// salt as well; the salt is kept alongside for the account record.
#[derive(Debug, Clone)]
pub struct HashedPassword {
    pub hash: String,
    pub salt: String,
}

fn hasher(config: &SecurityConfig) -> Result<Argon2<'static>> {
    let params = Params::new(
        config.argon2_memory_cost_kib,
        config.argon2_time_cost,
        config.argon2_parallelism,
        None,
    )
    .map_err(|e| anyhow::anyhow!("Invalid Argon2 params: {e}"))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// Hash a password using Argon2id with a fresh random salt.
pub fn hash_password(password: &str, config: &SecurityConfig) -> Result<HashedPassword> {
    let salt = SaltString::generate(&mut OsRng);

    let hash = hasher(config)?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(HashedPassword {
        hash: hash.to_string(),
        salt: salt.as_str().to_string(),
    })
}

/// Parameters are read back from the PHC string, so hashes made under older
/// settings still verify.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Argon2 is CPU-heavy; keep it off the async workers.
pub async fn hash_password_blocking(
    password: &str,
    config: &SecurityConfig,
) -> Result<HashedPassword> {
    let password = password.to_string();
    let config = config.clone();
    task::spawn_blocking(move || hash_password(&password, &config))
        .await
        .context("Password hashing task panicked")?
}

pub async fn verify_password_blocking(password: &str, stored_hash: &str) -> Result<bool> {
    let password = password.to_string();
    let stored_hash = stored_hash.to_string();
    task::spawn_blocking(move || verify_password(&password, &stored_hash))
        .await
        .context("Password verification task panicked")?
}
