//! 统一错误处理模块
//!
//! 定义签到核心的共享错误类型，使用 thiserror 提供良好的错误信息。
//! 错误分为三类：业务拒绝（不可重试）、资源争用（调用方可重试）、
//! 基础设施故障（框架层按退避策略重试）。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum SigninError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    // ==================== 缓存错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    // ==================== 业务拒绝 ====================
    #[error("签到功能未开启")]
    FeatureDisabled,

    #[error("今日已签到")]
    AlreadySignedIn,

    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 资源争用 ====================
    #[error("获取锁超时: {key}")]
    LockTimeout { key: String },

    // ==================== 任务错误 ====================
    #[error("未注册的任务处理器: {name}")]
    HandlerNotFound { name: String },

    #[error("任务管理器已停止，拒绝新任务")]
    TaskManagerStopped,

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, SigninError>;

impl SigninError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::FeatureDisabled => "FEATURE_DISABLED",
            Self::AlreadySignedIn => "ALREADY_SIGNED_IN",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::LockTimeout { .. } => "LOCK_TIMEOUT",
            Self::HandlerNotFound { .. } => "HANDLER_NOT_FOUND",
            Self::TaskManagerStopped => "TASK_MANAGER_STOPPED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 业务拒绝类错误（功能关闭、重复签到、参数错误）重试必然得到
    /// 相同结果，不应重试；瞬时故障和锁争用可以重试。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_) | Self::Redis(_) | Self::LockTimeout { .. }
        )
    }

    /// 是否为业务拒绝（对应 4xx 语义）
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::FeatureDisabled | Self::AlreadySignedIn | Self::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(SigninError::FeatureDisabled.code(), "FEATURE_DISABLED");
        assert_eq!(SigninError::AlreadySignedIn.code(), "ALREADY_SIGNED_IN");
        assert_eq!(
            SigninError::LockTimeout {
                key: "signin:lock:1".to_string()
            }
            .code(),
            "LOCK_TIMEOUT"
        );
    }

    #[test]
    fn test_is_retryable() {
        let db_err = SigninError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let lock_err = SigninError::LockTimeout {
            key: "signin:lock:1".to_string(),
        };
        assert!(lock_err.is_retryable());

        assert!(!SigninError::AlreadySignedIn.is_retryable());
        assert!(!SigninError::FeatureDisabled.is_retryable());
    }

    #[test]
    fn test_is_rejection() {
        assert!(SigninError::FeatureDisabled.is_rejection());
        assert!(SigninError::AlreadySignedIn.is_rejection());
        assert!(SigninError::Validation("limit 超出范围".to_string()).is_rejection());
        assert!(!SigninError::Database(sqlx::Error::PoolTimedOut).is_rejection());
        assert!(
            !SigninError::LockTimeout {
                key: "k".to_string()
            }
            .is_rejection()
        );
    }
}
