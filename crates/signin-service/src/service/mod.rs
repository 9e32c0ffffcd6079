//! 业务服务层

mod dto;
mod signin_service;

pub use dto::{RankingView, SigninOutcome, SigninStatusView};
pub use signin_service::SigninService;
