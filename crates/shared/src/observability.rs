//! 日志初始化模块
//!
//! 基于 tracing-subscriber 提供统一的日志初始化：
//! 环境变量过滤 + 可选 JSON 结构化输出。

use anyhow::Result;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::config::ObservabilityConfig;

/// 初始化日志订阅器
///
/// 过滤级别优先取 RUST_LOG 环境变量，其次取配置中的 log_level。
/// log_format 为 "json" 时输出结构化日志（生产环境采集友好），
/// 否则输出人类可读格式（本地开发友好）。
pub fn init(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.log_format == "json" {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(FmtSpan::CLOSE)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(true).with_ansi(true))
            .try_init()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_safe() {
        let config = ObservabilityConfig::default();
        // 第一次初始化成功或已被其他测试初始化，第二次必然失败，
        // 两种情况都不应 panic
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
