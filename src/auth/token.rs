//! Self-issued bearer tokens.
//!
//! A token is `header.payload.signature`, each segment base64url encoded with
//! padding kept, signed with HMAC-SHA256 over `header.payload`. Verification is
//! stateless: there is no session table and no revocation list, so a token
//! stays valid until `exp` unless the secret itself is rotated.

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use hmac::{Hmac, Mac};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::OnceLock;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::SecurityConfig;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";
const TOKEN_TYPE: &str = "JWT";

/// Reasons a presented token is refused. Every variant maps to 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Token is incorrect format")]
    Malformed,

    #[error("Token expired")]
    Expired,

    #[error("Token compromised")]
    Compromised,

    #[error("Could not verify")]
    Missing,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claim set carried by a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    /// Unix seconds.
    pub exp: i64,
}

/// Issues and verifies tokens with one process-wide secret.
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
    ttl_seconds: i64,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Fails when the secret is empty; callers treat that as a startup error.
    pub fn new(secret: &[u8], ttl_seconds: u64) -> Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("Token secret must not be empty");
        }
        let mac = HmacSha256::new_from_slice(secret).context("Invalid token secret")?;
        let ttl_seconds = i64::try_from(ttl_seconds).context("Token TTL is out of range")?;
        Ok(Self { mac, ttl_seconds })
    }

    pub fn from_config(config: &SecurityConfig) -> Result<Self> {
        let secret = config
            .token_secret
            .as_deref()
            .context("Token secret is not configured")?;
        Self::new(secret.as_bytes(), config.token_ttl_seconds)
    }

    #[must_use]
    pub const fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    /// Builds a token for `username` expiring `ttl` seconds after `now`.
    #[must_use]
    pub fn issue(&self, username: &str, now: i64) -> String {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: TOKEN_TYPE.to_string(),
        };
        let claims = Claims {
            username: username.to_string(),
            exp: now.saturating_add(self.ttl_seconds),
        };

        let signing_input = format!("{}.{}", encode_segment(&header), encode_segment(&claims));
        let signature = self.sign(&signing_input);
        format!("{signing_input}.{signature}")
    }

    /// Checks shape, then expiry, then signature.
    pub fn verify(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        if !token_pattern().is_match(token) {
            return Err(TokenError::Malformed);
        }

        let mut segments = token.splitn(3, '.');
        let (Some(header), Some(payload), Some(signature)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(TokenError::Malformed);
        };

        let header: Header = decode_segment(header)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::Malformed);
        }
        let claims: Claims = decode_segment(payload)?;

        if claims.exp < now {
            return Err(TokenError::Expired);
        }

        let signing_input = &token[..token.len() - signature.len() - 1];
        let expected = self.sign(signing_input);
        if !bool::from(expected.as_bytes().ct_eq(signature.as_bytes())) {
            return Err(TokenError::Compromised);
        }

        Ok(claims)
    }

    fn sign(&self, signing_input: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        URL_SAFE.encode(mac.finalize().into_bytes())
    }
}

fn token_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_=-]+\.[A-Za-z0-9_=-]+\.[A-Za-z0-9_=-]+$").expect("Invalid regex")
    })
}

fn encode_segment<T: Serialize>(value: &T) -> String {
    // Serializing these plain structs cannot fail.
    let json = serde_json::to_vec(value).unwrap_or_default();
    URL_SAFE.encode(json)
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, TokenError> {
    let bytes = URL_SAFE
        .decode(segment)
        .map_err(|_| TokenError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"test-secret", 3600).unwrap()
    }

    #[test]
    fn issue_then_verify_returns_claims() {
        let codec = codec();
        let token = codec.issue("alice", NOW);
        let claims = codec.verify(&token, NOW).unwrap();
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.exp, NOW + 3600);
    }

    #[test]
    fn token_is_three_padded_url_safe_segments() {
        let token = codec().issue("alice", NOW);
        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);
        // 32 byte MAC -> 44 chars with one '=' of padding.
        assert_eq!(segments[2].len(), 44);
        assert!(segments[2].ends_with('='));
        assert!(!token.contains('+') && !token.contains('/'));
    }

    #[test]
    fn valid_until_exactly_exp() {
        let codec = codec();
        let token = codec.issue("alice", NOW);
        assert!(codec.verify(&token, NOW + 3600).is_ok());
        assert_eq!(codec.verify(&token, NOW + 3601), Err(TokenError::Expired));
    }

    #[test]
    fn every_signature_character_flip_is_compromised() {
        let codec = codec();
        let token = codec.issue("alice", NOW);
        let sig_start = token.rfind('.').unwrap() + 1;

        for i in sig_start..token.len() {
            let mut bytes = token.clone().into_bytes();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = String::from_utf8(bytes).unwrap();
            assert_eq!(
                codec.verify(&tampered, NOW),
                Err(TokenError::Compromised),
                "flip at {i} accepted"
            );
        }
    }

    #[test]
    fn forged_payload_is_compromised() {
        let codec = codec();
        let token = codec.issue("alice", NOW);
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[1] = encode_segment(&Claims {
            username: "mallory".to_string(),
            exp: NOW + 3600,
        });
        assert_eq!(
            codec.verify(&parts.join("."), NOW),
            Err(TokenError::Compromised)
        );
    }

    #[test]
    fn other_secret_is_compromised() {
        let token = codec().issue("alice", NOW);
        let other = TokenCodec::new(b"other-secret", 3600).unwrap();
        assert_eq!(other.verify(&token, NOW), Err(TokenError::Compromised));
    }

    #[test]
    fn malformed_shapes() {
        let codec = codec();
        for token in ["", "abc", "a.b", "a.b.c.d", "a b.c.d", "a+b.c.d", "..", "e30=.e30=.e30="] {
            assert_eq!(codec.verify(token, NOW), Err(TokenError::Malformed), "{token:?}");
        }
    }

    #[test]
    fn expired_is_reported_before_signature() {
        let codec = codec();
        let token = codec.issue("alice", NOW);
        let tampered = format!("{}AAAA", &token[..token.len() - 4]);
        assert_eq!(codec.verify(&tampered, NOW + 7200), Err(TokenError::Expired));
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(TokenCodec::new(b"", 3600).is_err());
    }

    #[test]
    fn error_messages_are_fixed() {
        assert_eq!(TokenError::Malformed.to_string(), "Token is incorrect format");
        assert_eq!(TokenError::Expired.to_string(), "Token expired");
        assert_eq!(TokenError::Compromised.to_string(), "Token compromised");
        assert_eq!(TokenError::Missing.to_string(), "Could not verify");
    }
}
