//! 排行榜处理器

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use tracing::instrument;

use crate::error::Result;
use crate::state::AppState;

use super::dto::{RankingQuery, ok_response, optional_user_id};

/// GET /api/signin/ranking/daily — 当日奖励排行榜
#[instrument(skip(state, headers))]
pub async fn daily(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RankingQuery>,
) -> Result<Json<serde_json::Value>> {
    let limit = query.checked_limit()?;
    let viewer = optional_user_id(&headers);
    let view = state
        .service
        .daily_ranking(query.date, limit, viewer.as_deref())
        .await?;
    Ok(ok_response(view))
}

/// GET /api/signin/ranking/continuous — 连续签到排行榜
#[instrument(skip(state, headers))]
pub async fn continuous(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RankingQuery>,
) -> Result<Json<serde_json::Value>> {
    let limit = query.checked_limit()?;
    let viewer = optional_user_id(&headers);
    let view = state
        .service
        .continuous_ranking(limit, viewer.as_deref())
        .await?;
    Ok(ok_response(view))
}
