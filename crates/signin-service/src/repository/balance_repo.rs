//! 余额流水数据访问
//!
//! 当前余额不单独存表，而是取最新一条流水的 after_amount 推导。
//! 事务内读取余额时对用户最新流水加行锁，保证并发写入下
//! before/after 快照链不断裂。

use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;

use signin_shared::error::Result;

use crate::models::{BalanceLog, BalanceType};

/// 余额流水仓储
#[derive(Clone)]
pub struct BalanceRepository {
    pool: PgPool,
}

impl BalanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 查询当前余额（最新流水的 after_amount，无流水即为 0）
    #[instrument(skip(self))]
    pub async fn current_balance(&self, user_id: &str, balance_type: BalanceType) -> Result<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT after_amount
            FROM balance_logs
            WHERE user_id = $1 AND balance_type = $2
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(balance_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(balance.unwrap_or(0))
    }

    /// 事务内查询当前余额并锁定最新流水行
    pub async fn current_balance_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        balance_type: BalanceType,
    ) -> Result<i64> {
        let balance = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT after_amount
            FROM balance_logs
            WHERE user_id = $1 AND balance_type = $2
            ORDER BY id DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .bind(balance_type)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(balance.unwrap_or(0))
    }

    /// 追加一条流水，返回流水 ID
    ///
    /// 只插入，永不 UPDATE 或 DELETE。
    #[instrument(skip(self, tx, log), fields(user_id = %log.user_id, amount = log.amount))]
    pub async fn append(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        log: &BalanceLog,
    ) -> Result<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO balance_logs
                (user_id, balance_type, amount, before_amount, after_amount,
                 reason, operator_id, related_id, related_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(&log.user_id)
        .bind(log.balance_type)
        .bind(log.amount)
        .bind(log.before_amount)
        .bind(log.after_amount)
        .bind(&log.reason)
        .bind(&log.operator_id)
        .bind(log.related_id)
        .bind(&log.related_type)
        .fetch_one(&mut **tx)
        .await?;

        Ok(id)
    }

    /// 查询某日所有签到奖励流水的 (user_id, amount)（排行榜对账用）
    pub async fn signin_rewards_on(
        &self,
        sign_date: chrono::NaiveDate,
    ) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT bl.user_id, bl.amount
            FROM balance_logs bl
            JOIN signin_logs sl ON bl.related_id = sl.id
            WHERE bl.related_type = 'signin_log'
              AND sl.sign_date = $1
            "#,
        )
        .bind(sign_date)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// 分页查询用户流水，按时间倒序
    #[instrument(skip(self))]
    pub async fn list_by_user(
        &self,
        user_id: &str,
        balance_type: Option<BalanceType>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BalanceLog>> {
        let logs = sqlx::query_as::<_, BalanceLog>(
            r#"
            SELECT id, user_id, balance_type, amount, before_amount, after_amount,
                   reason, operator_id, related_id, related_type, created_at
            FROM balance_logs
            WHERE user_id = $1
              AND ($2::TEXT IS NULL OR balance_type = $2)
            ORDER BY id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(balance_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signin_shared::config::DatabaseConfig;
    use signin_shared::database::Database;
    use uuid::Uuid;

    async fn test_repo() -> BalanceRepository {
        let db = Database::connect(&DatabaseConfig::default()).await.unwrap();
        BalanceRepository::new(db.pool().clone())
    }

    #[tokio::test]
    #[ignore] // 需要数据库连接
    async fn test_balance_chain() {
        let repo = test_repo().await;
        let user_id = Uuid::new_v4().to_string();

        assert_eq!(
            repo.current_balance(&user_id, BalanceType::Points)
                .await
                .unwrap(),
            0
        );

        let mut tx = repo.pool.begin().await.unwrap();
        let before = repo
            .current_balance_for_update(&mut tx, &user_id, BalanceType::Points)
            .await
            .unwrap();
        let log = BalanceLog::record(&user_id, BalanceType::Points, 20, before, "每日签到");
        repo.append(&mut tx, &log).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = repo.pool.begin().await.unwrap();
        let before = repo
            .current_balance_for_update(&mut tx, &user_id, BalanceType::Points)
            .await
            .unwrap();
        assert_eq!(before, 20);
        let log = BalanceLog::record(&user_id, BalanceType::Points, 12, before, "每日签到");
        repo.append(&mut tx, &log).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            repo.current_balance(&user_id, BalanceType::Points)
                .await
                .unwrap(),
            32
        );

        let logs = repo
            .list_by_user(&user_id, Some(BalanceType::Points), 10, 0)
            .await
            .unwrap();
        assert_eq!(logs.len(), 2);
        // 倒序：最新一条在前
        assert_eq!(logs[0].amount, 12);
        assert_eq!(logs[0].before_amount, 20);
        assert_eq!(logs[0].after_amount, 32);
    }
}
