//! 路由与中间件装配

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, ranking, signin};
use crate::state::AppState;

/// 请求超时上限
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// 构建应用路由
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/api/signin", post(signin::signin))
        .route("/api/signin/status", get(signin::status))
        .route("/api/signin/calendar", get(signin::calendar))
        .route("/api/signin/balance/logs", get(signin::balance_logs))
        .route("/api/signin/ranking/daily", get(ranking::daily))
        .route("/api/signin/ranking/continuous", get(ranking::continuous))
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
