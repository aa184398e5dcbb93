use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::{ApiError, ApiResponse, AppState, MessageResponse, PageQuery};
use crate::services::blog::DEFAULT_PAGE_SIZE;
use crate::services::{CommentView, PostView};

#[derive(Debug, Deserialize)]
pub struct BodyRequest {
    pub body: String,
}

/// GET /posts
pub async fn list_posts(
    State(state): State<Arc<AppState>>,
    Query(page): Query<PageQuery>,
) -> Result<Json<ApiResponse<Vec<PostView>>>, ApiError> {
    let posts = state
        .blog()
        .list_posts(
            page.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            page.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(ApiResponse::success(posts)))
}

/// POST /posts
pub async fn create_post(
    State(state): State<Arc<AppState>>,
    AuthUser(account): AuthUser,
    Json(payload): Json<BodyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PostView>>), ApiError> {
    let post = state
        .blog()
        .create_post(account.internal_id, &account.username, &payload.body)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(post))))
}

/// DELETE /posts/{id}
pub async fn delete_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    AuthUser(account): AuthUser,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    state.blog().delete_post(account.internal_id, id).await?;
    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Post deleted",
    ))))
}

/// POST /posts/{id}/comments
pub async fn create_comment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    AuthUser(account): AuthUser,
    Json(payload): Json<BodyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CommentView>>), ApiError> {
    let comment = state
        .blog()
        .comment(account.internal_id, &account.username, id, &payload.body)
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(comment))))
}

/// GET /posts/{id}/comments
pub async fn list_comments(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<CommentView>>>, ApiError> {
    let comments = state.blog().list_comments(id).await?;
    Ok(Json(ApiResponse::success(comments)))
}
