use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::{ApiError, ApiResponse, AppState};
use crate::services::leaderboard::DEFAULT_LEADERBOARD_SIZE;
use crate::services::{LeaderboardService, RankedScore, ScoreReceipt};

#[derive(Debug, Deserialize)]
pub struct ScoreRequest {
    pub score: i64,
}

#[derive(Debug, Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

const fn default_limit() -> usize {
    DEFAULT_LEADERBOARD_SIZE
}

/// POST /games/{game}/scores
pub async fn submit_score(
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    AuthUser(account): AuthUser,
    Json(payload): Json<ScoreRequest>,
) -> Result<Json<ApiResponse<ScoreReceipt>>, ApiError> {
    let game = LeaderboardService::parse_game(&game)?;
    let receipt = state
        .leaderboard()
        .submit_score(account.internal_id, game, payload.score)
        .await?;
    Ok(Json(ApiResponse::success(receipt)))
}

/// GET /games/{game}/leaderboard
pub async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<ApiResponse<Vec<RankedScore>>>, ApiError> {
    let game = LeaderboardService::parse_game(&game)?;
    let top = state.leaderboard().top(game, query.limit).await?;
    Ok(Json(ApiResponse::success(top)))
}
