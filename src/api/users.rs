use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use std::sync::Arc;

use super::auth::AuthUser;
use super::{ApiError, ApiResponse, AppState, Credentials, MessageResponse};
use crate::services::{AccountUpdate, AccountView, CascadeReport, PublicProfile, UpdateResult};

/// POST /users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<Credentials>,
) -> Result<(StatusCode, Json<ApiResponse<AccountView>>), ApiError> {
    let view = state
        .accounts()
        .create_account(&payload.username, &payload.password)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(view))))
}

/// GET /users/{username}
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<PublicProfile>>, ApiError> {
    let profile = state.accounts().get_public_profile(&username).await?;
    Ok(Json(ApiResponse::success(profile)))
}

/// PUT /users/{username}
///
/// A rename answers with a fresh token; the old one stops resolving.
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    auth: AuthUser,
    Json(update): Json<AccountUpdate>,
) -> Result<Json<ApiResponse<UpdateResult>>, ApiError> {
    auth.ensure_self(&username)?;
    let result = state
        .accounts()
        .update_account(auth.0.internal_id, update)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}

/// DELETE /users/{username}
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    auth.ensure_self(&username)?;
    state.accounts().soft_delete(auth.0.internal_id).await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Account deleted",
    ))))
}

/// DELETE /users/{username}/purge
///
/// Runs the full cascade. A partial run is a 500 naming the failed steps;
/// `atelier purge` finishes it.
pub async fn purge_user(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
    auth: AuthUser,
) -> Result<Json<ApiResponse<CascadeReport>>, ApiError> {
    auth.ensure_self(&username)?;
    let report = state.accounts().hard_delete(auth.0.internal_id).await;

    if !report.is_complete() {
        let failed: Vec<String> = report.failed.iter().map(|f| f.step.to_string()).collect();
        return Err(ApiError::Incomplete(format!(
            "Account removal incomplete; failed steps: {}",
            failed.join(", ")
        )));
    }
    Ok(Json(ApiResponse::success(report)))
}
