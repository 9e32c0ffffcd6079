//! 数据模型定义

mod balance;
mod signin;

pub use balance::{BalanceLog, BalanceType};
pub use signin::{SigninLog, SigninStatus};
