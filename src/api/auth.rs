use axum::{
    Json,
    extract::{FromRequestParts, State},
    http::{HeaderMap, header, request::Parts},
};
use std::sync::Arc;

use super::{ApiError, ApiResponse, AppState, Credentials};
use crate::models::Account;
use crate::services::{AccountView, LoginResult};

// ============================================================================
// Extractor
// ============================================================================

/// The caller's active account, from an `Authorization: Bearer <token>` header.
///
/// Rejects with 401 and the token error's message. A well-signed token whose
/// username no longer names an active account is refused as "Could not verify".
pub struct AuthUser(pub Account);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer(&parts.headers);
        let account = state.accounts().authenticate(token).await?;

        tracing::Span::current().record("user_id", tracing::field::display(account.internal_id));
        Ok(Self(account))
    }
}

impl AuthUser {
    /// Handlers under `/users/{username}` only act on the caller's own account.
    pub fn ensure_self(&self, username: &str) -> Result<(), ApiError> {
        if self.0.has_username(username) {
            Ok(())
        } else {
            Err(ApiError::forbidden("You can only modify your own account"))
        }
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Credentials>,
) -> Result<Json<ApiResponse<LoginResult>>, ApiError> {
    if payload.username.is_empty() {
        return Err(ApiError::validation("Username is required"));
    }
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let result = state
        .accounts()
        .login(&payload.username, &payload.password)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// GET /auth/me
pub async fn me(AuthUser(account): AuthUser) -> Json<ApiResponse<AccountView>> {
    Json(ApiResponse::success(AccountView::from(&account)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_is_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(extract_bearer(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer(&headers), None);
    }
}
