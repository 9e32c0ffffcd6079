//! 签到相关处理器

use axum::Json;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use tracing::instrument;

use crate::error::Result;
use crate::state::AppState;

use super::dto::{BalanceLogQuery, CalendarQuery, ok_response, require_user_id};

/// POST /api/signin — 执行每日签到
#[instrument(skip(state, headers))]
pub async fn signin(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let user_id = require_user_id(&headers)?;
    let outcome = state.service.signin(&user_id).await?;
    Ok(ok_response(outcome))
}

/// GET /api/signin/status — 查询签到状态
#[instrument(skip(state, headers))]
pub async fn status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>> {
    let user_id = require_user_id(&headers)?;
    let view = state.service.get_status(&user_id).await?;
    Ok(ok_response(view))
}

/// GET /api/signin/calendar — 某月的签到日历
#[instrument(skip(state, headers))]
pub async fn calendar(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CalendarQuery>,
) -> Result<Json<serde_json::Value>> {
    let user_id = require_user_id(&headers)?;
    let month = query.checked_month()?;
    let dates = state.service.month_calendar(&user_id, month).await?;
    Ok(ok_response(dates))
}

/// GET /api/signin/balance/logs — 分页查询余额流水
#[instrument(skip(state, headers))]
pub async fn balance_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<BalanceLogQuery>,
) -> Result<Json<serde_json::Value>> {
    let user_id = require_user_id(&headers)?;
    let (limit, offset) = query.checked()?;
    let logs = state
        .service
        .balance_logs(&user_id, query.balance_type, limit, offset)
        .await?;
    Ok(ok_response(logs))
}
