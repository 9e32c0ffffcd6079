//! 应用共享状态

use std::sync::Arc;

use signin_shared::cache::Cache;
use signin_shared::database::Database;

use crate::service::SigninService;
use crate::tasks::TaskManager;

/// HTTP 处理器共享的应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<SigninService>,
    pub database: Database,
    pub cache: Cache,
    pub tasks: Arc<TaskManager>,
}
