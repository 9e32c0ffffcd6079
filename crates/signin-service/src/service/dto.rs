//! 服务层输出结构

use chrono::NaiveDate;
use serde::Serialize;

use crate::ranking::RankingEntry;

/// 签到成功的返回结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigninOutcome {
    /// 本次发放的积分
    pub reward: i64,
    /// 签到后的连续天数
    pub continuous_days: i32,
    /// 累计签到天数
    pub total_days: i32,
    /// 异步发放的经验值
    pub experience: i64,
}

/// 用户签到状态视图
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigninStatusView {
    pub user_id: String,
    /// 今天是否已签到
    pub signed_today: bool,
    pub continuous_days: i32,
    pub total_days: i32,
    pub last_signin_date: Option<NaiveDate>,
    /// 当前积分余额
    pub points_balance: i64,
}

/// 排行榜视图
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingView {
    pub entries: Vec<RankingEntry>,
    /// 查询者自己的名次，未上榜为 None
    pub me: Option<RankingEntry>,
}
