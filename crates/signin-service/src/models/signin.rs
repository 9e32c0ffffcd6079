//! 签到数据模型
//!
//! `SigninLog` 记录"发生过什么"：每次成功签到一行，永不修改；
//! `SigninStatus` 记录"当前是什么"：每个用户一行，签到时更新。

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// 签到日志
///
/// (user_id, sign_date) 上的唯一约束是防止重复入账的最后一道防线，
/// 即使分布式锁被绕过也能保证同一天至多一条记录。
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SigninLog {
    pub id: i64,
    pub user_id: String,
    pub sign_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

/// 用户签到状态
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SigninStatus {
    pub user_id: String,
    /// 最近一次签到日期，从未签到为 None
    pub last_signin_date: Option<NaiveDate>,
    /// 当前连续签到天数
    pub continuous_days: i32,
    /// 累计签到天数，只增不减
    pub total_days: i32,
    pub updated_at: DateTime<Utc>,
}

impl SigninStatus {
    /// 新用户的零值状态（从未签到）
    pub fn empty(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            last_signin_date: None,
            continuous_days: 0,
            total_days: 0,
            updated_at: Utc::now(),
        }
    }

    /// 计算在 today 签到后的新连续天数
    ///
    /// 间隔规则：
    /// - 从未签到或间隔 ≥ 2 天 → 重置为 1
    /// - 间隔恰好 1 天 → 连续天数 +1
    /// - 同一天 → 不应走到这里，由调用方先行拒绝
    pub fn next_continuous_days(&self, today: NaiveDate) -> i32 {
        match self.last_signin_date {
            Some(last) if today - last == chrono::Duration::days(1) => self.continuous_days + 1,
            _ => 1,
        }
    }

    /// 是否已在 today 签到
    pub fn signed_on(&self, today: NaiveDate) -> bool {
        self.last_signin_date == Some(today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_with_last(last: Option<NaiveDate>, continuous: i32) -> SigninStatus {
        SigninStatus {
            user_id: "u-1".to_string(),
            last_signin_date: last,
            continuous_days: continuous,
            total_days: 10,
            updated_at: Utc::now(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_status() {
        let status = SigninStatus::empty("u-1");
        assert_eq!(status.continuous_days, 0);
        assert_eq!(status.total_days, 0);
        assert!(status.last_signin_date.is_none());
    }

    #[test]
    fn test_first_signin_starts_streak() {
        let status = status_with_last(None, 0);
        assert_eq!(status.next_continuous_days(date("2025-06-10")), 1);
    }

    #[test]
    fn test_consecutive_day_increments_streak() {
        let status = status_with_last(Some(date("2025-06-09")), 6);
        assert_eq!(status.next_continuous_days(date("2025-06-10")), 7);
    }

    #[test]
    fn test_gap_resets_streak() {
        // 隔 2 天
        let status = status_with_last(Some(date("2025-06-08")), 15);
        assert_eq!(status.next_continuous_days(date("2025-06-10")), 1);

        // 隔一个月
        let status = status_with_last(Some(date("2025-05-10")), 30);
        assert_eq!(status.next_continuous_days(date("2025-06-10")), 1);
    }

    #[test]
    fn test_month_boundary_counts_as_consecutive() {
        let status = status_with_last(Some(date("2025-05-31")), 3);
        assert_eq!(status.next_continuous_days(date("2025-06-01")), 4);
    }

    #[test]
    fn test_signed_on() {
        let status = status_with_last(Some(date("2025-06-10")), 1);
        assert!(status.signed_on(date("2025-06-10")));
        assert!(!status.signed_on(date("2025-06-11")));

        let never = status_with_last(None, 0);
        assert!(!never.signed_on(date("2025-06-10")));
    }
}
