//! 健康检查处理器

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde_json::json;

use crate::state::AppState;

/// GET /health — 存活探针，进程在即 200
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /ready — 就绪探针，检查数据库与 Redis 连通性
///
/// 附带任务队列深度：pending 持续增长或 dead 非零是运维告警信号，
/// 但不影响就绪判定。
pub async fn ready(
    State(state): State<AppState>,
) -> std::result::Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let database_ok = state.database.health_check().await.is_ok();
    let cache_ok = state.cache.health_check().await.is_ok();

    let queue = state.tasks.queue();
    let pending = queue.pending_len().await.ok();
    let processing = queue.processing_len().await.ok();
    let dead = queue.dead_len().await.ok();

    let body = json!({
        "status": if database_ok && cache_ok { "ready" } else { "degraded" },
        "checks": {
            "database": database_ok,
            "redis": cache_ok,
        },
        "queue": {
            "pending": pending,
            "processing": processing,
            "dead": dead,
        }
    });

    if database_ok && cache_ok {
        Ok(Json(body))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(body)))
    }
}
