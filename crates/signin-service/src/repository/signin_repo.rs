//! 签到数据访问
//!
//! signin_logs 只插入不更新；signin_status 每用户一行，UPSERT 维护。
//! (user_id, sign_date) 唯一约束冲突在此映射为 `AlreadySignedIn`，
//! 作为分布式锁之外的最后一道重复入账防线。

use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;

use signin_shared::error::{Result, SigninError};

use crate::models::{SigninLog, SigninStatus};

/// 签到仓储
#[derive(Clone)]
pub struct SigninRepository {
    pool: PgPool,
}

impl SigninRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 查询用户签到状态，无记录返回 None
    #[instrument(skip(self))]
    pub async fn get_status(&self, user_id: &str) -> Result<Option<SigninStatus>> {
        let status = sqlx::query_as::<_, SigninStatus>(
            r#"
            SELECT user_id, last_signin_date, continuous_days, total_days, updated_at
            FROM signin_status
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    /// 事务内查询签到状态并加行锁
    ///
    /// FOR UPDATE 保证锁内读到的状态在事务提交前不被并发事务修改。
    pub async fn get_status_for_update(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
    ) -> Result<Option<SigninStatus>> {
        let status = sqlx::query_as::<_, SigninStatus>(
            r#"
            SELECT user_id, last_signin_date, continuous_days, total_days, updated_at
            FROM signin_status
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(status)
    }

    /// 插入签到日志，返回日志 ID
    ///
    /// 唯一约束冲突（同一天已有记录）映射为 `AlreadySignedIn`。
    #[instrument(skip(self, tx))]
    pub async fn insert_log(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: &str,
        sign_date: NaiveDate,
    ) -> Result<i64> {
        let result = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO signin_logs (user_id, sign_date)
            VALUES ($1, $2)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(sign_date)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(id) => Ok(id),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("23505") => {
                Err(SigninError::AlreadySignedIn)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// UPSERT 用户签到状态
    pub async fn upsert_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        status: &SigninStatus,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signin_status (user_id, last_signin_date, continuous_days, total_days, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (user_id) DO UPDATE SET
                last_signin_date = EXCLUDED.last_signin_date,
                continuous_days = EXCLUDED.continuous_days,
                total_days = EXCLUDED.total_days,
                updated_at = NOW()
            "#,
        )
        .bind(&status.user_id)
        .bind(status.last_signin_date)
        .bind(status.continuous_days)
        .bind(status.total_days)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// 查询用户在 [from, to) 区间内的签到日志（签到日历用）
    #[instrument(skip(self))]
    pub async fn logs_in_range(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SigninLog>> {
        let logs = sqlx::query_as::<_, SigninLog>(
            r#"
            SELECT id, user_id, sign_date, created_at
            FROM signin_logs
            WHERE user_id = $1 AND sign_date >= $2 AND sign_date < $3
            ORDER BY sign_date
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    /// 查询全部签到状态（对账任务重建连续榜用）
    pub async fn all_status(&self) -> Result<Vec<SigninStatus>> {
        let status = sqlx::query_as::<_, SigninStatus>(
            r#"
            SELECT user_id, last_signin_date, continuous_days, total_days, updated_at
            FROM signin_status
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(status)
    }
}
