//! HTTP 错误映射
//!
//! 业务拒绝映射为 4xx 并透传错误文案；基础设施故障一律 500，
//! 对外只返回通用文案，内部细节进日志不进响应体。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use signin_shared::error::SigninError;

/// HTTP 层错误
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

/// HTTP 层结果类型别名
pub type Result<T> = std::result::Result<T, ApiError>;

impl From<SigninError> for ApiError {
    fn from(err: SigninError) -> Self {
        let code = err.code();
        let (status, message) = match &err {
            SigninError::FeatureDisabled => (StatusCode::FORBIDDEN, err.to_string()),
            SigninError::AlreadySignedIn => (StatusCode::CONFLICT, err.to_string()),
            SigninError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
            // 系统错误细节只进日志，响应体给通用文案
            _ => {
                error!(error = %err, code, "请求处理失败");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "服务暂时不可用，请稍后重试".to_string(),
                )
            }
        };

        Self {
            status,
            code,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "success": false,
            "error": {
                "code": self.code,
                "message": self.message,
            }
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_status_mapping() {
        let cases = [
            (SigninError::FeatureDisabled, StatusCode::FORBIDDEN),
            (SigninError::AlreadySignedIn, StatusCode::CONFLICT),
            (
                SigninError::Validation("limit 超出范围".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                SigninError::LockTimeout {
                    key: "signin:lock:1".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                SigninError::Internal("boom".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let api_err = ApiError::from(err);
            assert_eq!(api_err.status, expected);
        }
    }

    #[test]
    fn test_system_error_detail_is_hidden() {
        let api_err = ApiError::from(SigninError::Internal("连接池内部状态泄露".to_string()));
        assert!(!api_err.message.contains("连接池"));
        assert_eq!(api_err.code, "INTERNAL_ERROR");
    }

    #[test]
    fn test_rejection_message_is_kept() {
        let api_err = ApiError::from(SigninError::AlreadySignedIn);
        assert_eq!(api_err.message, "今日已签到");
    }
}
