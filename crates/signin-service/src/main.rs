//! 签到服务入口

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::info;

use signin_shared::cache::Cache;
use signin_shared::config::AppConfig;
use signin_shared::database::Database;
use signin_shared::error::SigninError;
use signin_shared::observability;
use signin_shared::retry::{RetryPolicy, retry_with_policy};

use signin_service::lock::LockManager;
use signin_service::ranking::RankingStore;
use signin_service::repository::{BalanceRepository, SigninRepository};
use signin_service::routes::app_router;
use signin_service::service::SigninService;
use signin_service::settings::{CachedSettings, DbSettingsProvider};
use signin_service::state::AppState;
use signin_service::tasks::{
    ExperienceGrantHandler, Schedule, StatsSyncHandler, TASK_STATS_SYNC, TaskManager,
};

const SERVICE_NAME: &str = "signin-service";

/// 统计对账任务的触发间隔
const STATS_SYNC_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;
    observability::init(&config.observability).context("日志初始化失败")?;

    info!(environment = %config.environment, "signin-service 启动中");

    // ==================== 基础设施 ====================

    // 滚动发布时依赖可能晚于本服务就绪，启动连接做有限次退避重试
    let startup_retry = RetryPolicy::default();

    let database = retry_with_policy(
        &startup_retry,
        "database_connect",
        SigninError::is_retryable,
        || Database::connect(&config.database),
    )
    .await
    .context("数据库连接失败")?;
    sqlx::migrate!("../../migrations")
        .run(database.pool())
        .await
        .context("数据库迁移失败")?;

    let cache = Cache::new(&config.redis).context("Redis 客户端创建失败")?;
    retry_with_policy(
        &startup_retry,
        "redis_health_check",
        SigninError::is_retryable,
        || cache.health_check(),
    )
    .await
    .context("Redis 连接检查失败")?;

    // ==================== 组件装配 ====================

    let ranking = RankingStore::new(cache.clone());
    let lock = LockManager::new(cache.client().clone(), config.lock.clone());
    let settings = Arc::new(CachedSettings::with_default_ttl(DbSettingsProvider::new(
        database.pool().clone(),
    )));

    let mut task_manager = TaskManager::new(cache.clone(), config.task.clone());
    task_manager.register_handler(Arc::new(ExperienceGrantHandler::new(cache.clone())));
    task_manager.register_handler(Arc::new(StatsSyncHandler::new(
        SigninRepository::new(database.pool().clone()),
        BalanceRepository::new(database.pool().clone()),
        ranking.clone(),
    )));
    task_manager.schedule(
        TASK_STATS_SYNC,
        Schedule::Every(STATS_SYNC_INTERVAL),
        serde_json::json!({}),
    );
    let task_manager = Arc::new(task_manager);
    task_manager.start().await;

    let service = Arc::new(SigninService::new(
        database.pool().clone(),
        ranking,
        lock,
        settings,
        task_manager.clone(),
    ));

    let state = AppState {
        service,
        database: database.clone(),
        cache,
        tasks: task_manager.clone(),
    };

    // ==================== HTTP 服务 ====================

    let addr = config.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("监听地址 {} 失败", addr))?;
    info!(addr = %addr, "HTTP 服务就绪");

    axum::serve(listener, app_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP 服务异常退出")?;

    // HTTP 停止接收请求后再停任务系统，给在途任务留排空窗口
    info!("HTTP 服务已停止，开始停止任务管理器");
    task_manager.stop().await;
    database.close().await;

    info!("signin-service 退出");
    Ok(())
}

/// 等待终止信号（Ctrl+C 或 SIGTERM）
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到 Ctrl+C，开始优雅退出"),
        _ = terminate => info!("收到 SIGTERM，开始优雅退出"),
    }
}
