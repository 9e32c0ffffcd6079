//! 异步任务子系统
//!
//! 签到主流程只做必须同步完成的事（锁、事务、排行榜），
//! 经验发放、统计对账等旁路工作投递到 Redis 队列，
//! 由常驻 worker 按至少一次语义消费。

mod handlers;
mod manager;
mod queue;

pub use handlers::{
    ExperienceGrantHandler, ExperienceGrantPayload, StatsSyncHandler, StatsSyncPayload,
    TASK_EXPERIENCE_GRANT, TASK_STATS_SYNC,
};
pub use manager::{Schedule, TaskHandler, TaskManager};
pub use queue::{LeasedTask, TaskMessage, TaskQueue};
