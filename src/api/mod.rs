use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::state::SharedState;

pub mod auth;
mod drawings;
mod error;
mod games;
mod observability;
mod posts;
mod types;
mod users;

pub use error::ApiError;
pub use types::*;

use crate::services::{AccountService, BlogService, DrawingService, LeaderboardService};
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub shared: Arc<SharedState>,

    pub start_time: std::time::Instant,

    pub prometheus_handle: Option<PrometheusHandle>,
}

impl AppState {
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    #[must_use]
    pub fn accounts(&self) -> &dyn AccountService {
        self.shared.accounts.as_ref()
    }

    #[must_use]
    pub fn leaderboard(&self) -> &LeaderboardService {
        &self.shared.leaderboard
    }

    #[must_use]
    pub fn drawings(&self) -> &DrawingService {
        &self.shared.drawings
    }

    #[must_use]
    pub fn blog(&self) -> &BlogService {
        &self.shared.blog
    }
}

#[must_use]
pub fn create_app_state(
    shared: Arc<SharedState>,
    prometheus_handle: Option<PrometheusHandle>,
) -> Arc<AppState> {
    Arc::new(AppState {
        shared,
        start_time: std::time::Instant::now(),
        prometheus_handle,
    })
}

pub async fn create_app_state_from_config(
    config: Config,
    prometheus_handle: Option<PrometheusHandle>,
) -> anyhow::Result<Arc<AppState>> {
    let shared = Arc::new(SharedState::new(config).await?);
    Ok(create_app_state(shared, prometheus_handle))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors_origins = state.config().server.cors_allowed_origins.clone();
    let max_body_bytes = state.config().server.max_body_bytes;

    let api_router = Router::new()
        .route("/users", post(users::create_user))
        .route(
            "/users/{username}",
            get(users::get_profile)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/users/{username}/purge", delete(users::purge_user))
        .route("/auth/login", post(auth::login))
        .route("/auth/me", get(auth::me))
        .route("/games/{game}/scores", post(games::submit_score))
        .route("/games/{game}/leaderboard", get(games::leaderboard))
        .route("/drawings", get(drawings::list).post(drawings::upload))
        .route("/drawings/{id}/image", get(drawings::image))
        .route("/drawings/{id}/like", post(drawings::toggle_like))
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route("/posts/{id}", delete(posts::delete_post))
        .route(
            "/posts/{id}/comments",
            get(posts::list_comments).post(posts::create_comment),
        )
        .route("/health", get(observability::health))
        .route("/metrics", get(observability::get_metrics))
        .layer(middleware::from_fn(observability::request_middleware))
        .with_state(state);

    let cors_layer = if cors_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|s| s.parse().ok()).collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .nest("/api", api_router)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(cors_layer.allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(
            observability::security_headers_middleware,
        ))
}
