use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::{ApiError, ApiResponse, AppState};
use crate::domain::DrawingId;
use crate::services::{DrawingView, LikeResult};

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    #[serde(default)]
    pub title: String,
    /// Base64 PNG, optionally as a data URL.
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub artist: Option<String>,
}

fn parse_id(id: &str) -> Result<DrawingId, ApiError> {
    id.parse()
        .map_err(|_| ApiError::not_found("Drawing", id))
}

/// POST /drawings
pub async fn upload(
    State(state): State<Arc<AppState>>,
    AuthUser(account): AuthUser,
    Json(payload): Json<UploadRequest>,
) -> Result<Json<ApiResponse<DrawingView>>, ApiError> {
    let view = state
        .drawings()
        .upload(
            account.internal_id,
            &account.username,
            &payload.title,
            &payload.image,
        )
        .await?;
    Ok(Json(ApiResponse::success(view)))
}

/// GET /drawings?artist=
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ApiResponse<Vec<DrawingView>>>, ApiError> {
    let drawings = state.drawings().list(query.artist.as_deref()).await?;
    Ok(Json(ApiResponse::success(drawings)))
}

/// GET /drawings/{id}/image
pub async fn image(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let bytes = state.drawings().image(id).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

/// POST /drawings/{id}/like
pub async fn toggle_like(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AuthUser(account): AuthUser,
) -> Result<Json<ApiResponse<LikeResult>>, ApiError> {
    let id = parse_id(&id)?;
    let result = state
        .drawings()
        .toggle_like(account.internal_id, id)
        .await?;
    Ok(Json(ApiResponse::success(result)))
}
