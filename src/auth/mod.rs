pub mod password;
pub mod token;

pub use password::{HashedPassword, hash_password_blocking, verify_password_blocking};
pub use token::{Claims, TokenCodec, TokenError};

/// Current Unix time in whole seconds.
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
