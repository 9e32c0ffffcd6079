//! 余额流水模型
//!
//! 采用复式记账思想：每次积分/虚拟币变动记录变动前后的快照，
//! 行一旦写入永不更新或删除，构成可追溯的审计日志。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 余额类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BalanceType {
    /// 积分
    Points,
    /// 虚拟币
    Currency,
}

/// 余额流水
///
/// 不变式：after_amount = before_amount + amount，在构造时计算并固定，
/// 之后永不重算。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BalanceLog {
    pub id: i64,
    pub user_id: String,
    pub balance_type: BalanceType,
    /// 变动数额（有符号，扣减为负）
    pub amount: i64,
    pub before_amount: i64,
    pub after_amount: i64,
    pub reason: String,
    /// 操作人，None 表示系统发起
    pub operator_id: Option<String>,
    /// 关联实体（如签到日志 ID）
    pub related_id: Option<i64>,
    pub related_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BalanceLog {
    /// 基于变动前余额构造一条流水，before/after 快照在此处一次性固定
    pub fn record(
        user_id: &str,
        balance_type: BalanceType,
        amount: i64,
        before_amount: i64,
        reason: &str,
    ) -> Self {
        Self {
            id: 0,
            user_id: user_id.to_string(),
            balance_type,
            amount,
            before_amount,
            after_amount: before_amount + amount,
            reason: reason.to_string(),
            operator_id: None,
            related_id: None,
            related_type: None,
            created_at: Utc::now(),
        }
    }

    /// 附加关联实体引用
    pub fn with_related(mut self, related_id: i64, related_type: &str) -> Self {
        self.related_id = Some(related_id);
        self.related_type = Some(related_type.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_snapshot_invariant() {
        let log = BalanceLog::record("u-1", BalanceType::Points, 20, 100, "每日签到");
        assert_eq!(log.before_amount, 100);
        assert_eq!(log.amount, 20);
        assert_eq!(log.after_amount, 120);
        assert_eq!(log.after_amount - log.before_amount, log.amount);
        // 系统发起，无操作人
        assert!(log.operator_id.is_none());
    }

    #[test]
    fn test_record_negative_amount() {
        let log = BalanceLog::record("u-1", BalanceType::Currency, -30, 50, "兑换扣减");
        assert_eq!(log.after_amount, 20);
        assert_eq!(log.after_amount - log.before_amount, log.amount);
    }

    #[test]
    fn test_with_related() {
        let log = BalanceLog::record("u-1", BalanceType::Points, 5, 0, "每日签到")
            .with_related(42, "signin_log");
        assert_eq!(log.related_id, Some(42));
        assert_eq!(log.related_type.as_deref(), Some("signin_log"));
    }

    #[test]
    fn test_balance_type_serde() {
        let json = serde_json::to_string(&BalanceType::Points).unwrap();
        assert_eq!(json, r#""points""#);
        let parsed: BalanceType = serde_json::from_str(r#""currency""#).unwrap();
        assert_eq!(parsed, BalanceType::Currency);
    }
}
