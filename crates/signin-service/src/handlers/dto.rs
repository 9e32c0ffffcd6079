//! HTTP 请求与响应结构

use axum::Json;
use axum::http::HeaderMap;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use signin_shared::error::SigninError;

use crate::error::{ApiError, Result};
use crate::models::BalanceType;

/// 用户身份请求头（由上游网关注入）
pub const USER_ID_HEADER: &str = "x-user-id";

/// 统一成功响应包装
pub fn ok_response<T: Serialize>(data: T) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "data": data,
    }))
}

/// 从请求头提取用户 ID，缺失视为参数错误
pub fn require_user_id(headers: &HeaderMap) -> Result<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| {
            ApiError::from(SigninError::Validation(format!(
                "缺少 {} 请求头",
                USER_ID_HEADER
            )))
        })
}

/// 可选的用户 ID（排行榜允许匿名查看）
pub fn optional_user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// 排行榜查询参数
#[derive(Debug, Deserialize, Validate)]
pub struct RankingQuery {
    /// 查询日期，缺省为今天（仅当日榜使用）
    pub date: Option<NaiveDate>,
    /// 返回名次数量，默认 10，上限 100
    #[validate(range(min = 1, max = 100, message = "limit 必须在 1 到 100 之间"))]
    pub limit: Option<usize>,
}

impl RankingQuery {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn checked_limit(&self) -> Result<usize> {
        self.validate()
            .map_err(|e| ApiError::from(SigninError::Validation(e.to_string())))?;
        Ok(self.limit.unwrap_or(Self::DEFAULT_LIMIT))
    }
}

/// 签到日历查询参数
#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    /// 月份，格式 YYYY-MM，缺省为当月
    pub month: Option<String>,
}

impl CalendarQuery {
    pub fn checked_month(&self) -> Result<Option<(i32, u32)>> {
        let Some(raw) = &self.month else {
            return Ok(None);
        };

        let invalid =
            || ApiError::from(SigninError::Validation("month 格式须为 YYYY-MM".to_string()));

        let (year, month) = raw.split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }

        Ok(Some((year, month)))
    }
}

/// 余额流水查询参数
#[derive(Debug, Deserialize, Validate)]
pub struct BalanceLogQuery {
    pub balance_type: Option<BalanceType>,
    #[validate(range(min = 1, max = 100, message = "limit 必须在 1 到 100 之间"))]
    pub limit: Option<i64>,
    #[validate(range(min = 0, message = "offset 不能为负"))]
    pub offset: Option<i64>,
}

impl BalanceLogQuery {
    pub const DEFAULT_LIMIT: i64 = 20;

    pub fn checked(&self) -> Result<(i64, i64)> {
        self.validate()
            .map_err(|e| ApiError::from(SigninError::Validation(e.to_string())))?;
        Ok((
            self.limit.unwrap_or(Self::DEFAULT_LIMIT),
            self.offset.unwrap_or(0),
        ))
    }
}
