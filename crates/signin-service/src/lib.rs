//! 每日签到服务
//!
//! 论坛的签到奖励、连续天数与排行榜核心：
//! - 按用户加分布式锁保证同一天恰好签到一次
//! - 奖励按固定/递增/随机三种模式从配置计算
//! - 积分变动写入可审计的余额流水
//! - 排行榜基于 Redis 有序集合维护，失败不影响签到主流程
//! - 任务系统承载签到后的异步副作用与周期性统计同步

pub mod error;
pub mod handlers;
pub mod lock;
pub mod models;
pub mod ranking;
pub mod repository;
pub mod reward;
pub mod routes;
pub mod service;
pub mod settings;
pub mod state;
pub mod tasks;

pub use error::{ApiError, Result};
