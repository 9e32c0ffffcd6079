//! 签到服务
//!
//! 签到主流程的编排者。同步路径只做必须原子完成的事：
//! 锁 + 单事务内（日志插入、状态更新、余额流水）；
//! 排行榜写入和经验发放在事务提交后进行，失败不影响签到结果。

use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, instrument, warn};

use signin_shared::cache::CacheKey;
use signin_shared::error::{Result, SigninError};

use crate::lock::LockManager;
use crate::models::{BalanceLog, BalanceType, SigninStatus};
use crate::ranking::RankingStore;
use crate::repository::{BalanceRepository, SigninRepository};
use crate::reward;
use crate::settings::{SettingsProvider, SigninSettings};
use crate::tasks::{TASK_EXPERIENCE_GRANT, TaskManager};

use super::dto::{RankingView, SigninOutcome, SigninStatusView};

/// 签到奖励流水的 reason 文案
const SIGNIN_REWARD_REASON: &str = "每日签到";
/// 流水关联实体类型
const RELATED_SIGNIN_LOG: &str = "signin_log";

/// 事务提交后仍需要的中间结果
struct CommittedSignin {
    log_id: i64,
    reward: i64,
    continuous_days: i32,
    total_days: i32,
}

/// 签到服务
pub struct SigninService {
    pool: PgPool,
    signin_repo: SigninRepository,
    balance_repo: BalanceRepository,
    ranking: RankingStore,
    lock: LockManager,
    settings: Arc<dyn SettingsProvider>,
    tasks: Arc<TaskManager>,
}

impl SigninService {
    pub fn new(
        pool: PgPool,
        ranking: RankingStore,
        lock: LockManager,
        settings: Arc<dyn SettingsProvider>,
        tasks: Arc<TaskManager>,
    ) -> Self {
        Self {
            signin_repo: SigninRepository::new(pool.clone()),
            balance_repo: BalanceRepository::new(pool.clone()),
            pool,
            ranking,
            lock,
            settings,
            tasks,
        }
    }

    // ==================== 签到 ====================

    /// 执行每日签到
    ///
    /// 同一用户同一天无论并发多少次请求，至多成功一次。
    #[instrument(skip(self))]
    pub async fn signin(&self, user_id: &str) -> Result<SigninOutcome> {
        validate_user_id(user_id)?;

        let settings = self.settings.signin_settings().await?;
        if !settings.enabled {
            return Err(SigninError::FeatureDisabled);
        }

        let today = Utc::now().date_naive();

        // 锁外快速拒绝：已签到的重复请求不必排队抢锁
        if let Some(status) = self.signin_repo.get_status(user_id).await?
            && status.signed_on(today)
        {
            return Err(SigninError::AlreadySignedIn);
        }

        let guard = self
            .lock
            .acquire(&CacheKey::signin_lock(user_id), None)
            .await?;

        // 锁内逻辑单独成段，保证任何分支都会走到显式释放
        let committed = self.signin_locked(user_id, today, &settings).await;

        if let Err(e) = guard.release().await {
            warn!(user_id = %user_id, error = %e, "锁释放失败，等待租约自动过期");
        }

        let committed = committed?;

        // 事务已提交，签到既成事实；以下均为尽力而为的旁路写入
        self.update_rankings(user_id, today, &committed).await;
        self.enqueue_experience_grant(user_id, &settings, &committed)
            .await;

        info!(
            user_id = %user_id,
            reward = committed.reward,
            continuous_days = committed.continuous_days,
            "签到成功"
        );

        Ok(SigninOutcome {
            reward: committed.reward,
            continuous_days: committed.continuous_days,
            total_days: committed.total_days,
            experience: settings.experience_reward,
        })
    }

    /// 锁内的读-改-写：单事务原子完成日志、状态、流水三处写入
    async fn signin_locked(
        &self,
        user_id: &str,
        today: NaiveDate,
        settings: &SigninSettings,
    ) -> Result<CommittedSignin> {
        let mut tx = self.pool.begin().await?;

        let status = self
            .signin_repo
            .get_status_for_update(&mut tx, user_id)
            .await?
            .unwrap_or_else(|| SigninStatus::empty(user_id));

        // 锁内复查：抢锁期间可能已有并发请求完成签到
        if status.signed_on(today) {
            return Err(SigninError::AlreadySignedIn);
        }

        let log_id = self.signin_repo.insert_log(&mut tx, user_id, today).await?;

        let continuous_days = status.next_continuous_days(today);
        let total_days = status.total_days + 1;
        let new_status = SigninStatus {
            user_id: user_id.to_string(),
            last_signin_date: Some(today),
            continuous_days,
            total_days,
            updated_at: Utc::now(),
        };
        self.signin_repo.upsert_status(&mut tx, &new_status).await?;

        // 奖励按"签到后"的连续天数计算
        let reward = reward::compute(&settings.reward, continuous_days as i64);

        let before = self
            .balance_repo
            .current_balance_for_update(&mut tx, user_id, BalanceType::Points)
            .await?;
        let log = BalanceLog::record(
            user_id,
            BalanceType::Points,
            reward,
            before,
            SIGNIN_REWARD_REASON,
        )
        .with_related(log_id, RELATED_SIGNIN_LOG);
        self.balance_repo.append(&mut tx, &log).await?;

        tx.commit().await?;

        Ok(CommittedSignin {
            log_id,
            reward,
            continuous_days,
            total_days,
        })
    }

    /// 排行榜写入：失败只告警，由周期对账任务兜底补齐
    async fn update_rankings(&self, user_id: &str, today: NaiveDate, committed: &CommittedSignin) {
        if let Err(e) = self
            .ranking
            .upsert_daily(today, user_id, committed.reward)
            .await
        {
            warn!(user_id = %user_id, error = %e, "当日榜写入失败，等待对账任务修复");
        }

        if let Err(e) = self
            .ranking
            .upsert_continuous(user_id, committed.continuous_days as i64)
            .await
        {
            warn!(user_id = %user_id, error = %e, "连续榜写入失败，等待对账任务修复");
        }
    }

    /// 投递经验发放任务：grant_id 取签到日志 ID，队列重放不会重复发放
    async fn enqueue_experience_grant(
        &self,
        user_id: &str,
        settings: &SigninSettings,
        committed: &CommittedSignin,
    ) {
        if settings.experience_reward <= 0 {
            return;
        }

        let payload = json!({
            "userId": user_id,
            "reward": committed.reward,
            "experience": settings.experience_reward,
            "grantId": committed.log_id.to_string(),
        });

        if let Err(e) = self.tasks.enqueue(TASK_EXPERIENCE_GRANT, payload).await {
            warn!(user_id = %user_id, error = %e, "经验发放任务投递失败");
        }
    }

    // ==================== 查询 ====================

    /// 查询用户签到状态（从未签到的用户返回零值状态）
    #[instrument(skip(self))]
    pub async fn get_status(&self, user_id: &str) -> Result<SigninStatusView> {
        validate_user_id(user_id)?;

        let status = self
            .signin_repo
            .get_status(user_id)
            .await?
            .unwrap_or_else(|| SigninStatus::empty(user_id));
        let balance = self
            .balance_repo
            .current_balance(user_id, BalanceType::Points)
            .await?;

        let today = Utc::now().date_naive();
        Ok(SigninStatusView {
            user_id: user_id.to_string(),
            signed_today: status.signed_on(today),
            continuous_days: status.continuous_days,
            total_days: status.total_days,
            last_signin_date: status.last_signin_date,
            points_balance: balance,
        })
    }

    /// 查询用户某月的签到日历（已签到的日期列表）
    ///
    /// month 为 None 时取当月。
    #[instrument(skip(self))]
    pub async fn month_calendar(
        &self,
        user_id: &str,
        month: Option<(i32, u32)>,
    ) -> Result<Vec<NaiveDate>> {
        validate_user_id(user_id)?;

        let today = Utc::now().date_naive();
        let (year, month) = month.unwrap_or((today.year(), today.month()));

        let first = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| SigninError::Validation(format!("无效月份: {}-{}", year, month)))?;
        let next_month = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| SigninError::Validation(format!("无效月份: {}-{}", year, month)))?;

        let logs = self
            .signin_repo
            .logs_in_range(user_id, first, next_month)
            .await?;

        Ok(logs.into_iter().map(|log| log.sign_date).collect())
    }

    /// 查询某日奖励排行榜
    #[instrument(skip(self))]
    pub async fn daily_ranking(
        &self,
        date: Option<NaiveDate>,
        limit: usize,
        viewer_id: Option<&str>,
    ) -> Result<RankingView> {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let entries = self.ranking.daily_top(date, limit).await?;

        let me = match viewer_id {
            Some(user_id) => self.ranking.daily_rank_of(date, user_id).await?,
            None => None,
        };

        Ok(RankingView { entries, me })
    }

    /// 查询连续签到排行榜
    #[instrument(skip(self))]
    pub async fn continuous_ranking(
        &self,
        limit: usize,
        viewer_id: Option<&str>,
    ) -> Result<RankingView> {
        let entries = self.ranking.continuous_top(limit).await?;

        let me = match viewer_id {
            Some(user_id) => self.ranking.continuous_rank_of(user_id).await?,
            None => None,
        };

        Ok(RankingView { entries, me })
    }

    /// 分页查询用户余额流水
    #[instrument(skip(self))]
    pub async fn balance_logs(
        &self,
        user_id: &str,
        balance_type: Option<BalanceType>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BalanceLog>> {
        validate_user_id(user_id)?;
        self.balance_repo
            .list_by_user(user_id, balance_type, limit, offset)
            .await
    }
}

fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() || user_id.len() > 64 {
        return Err(SigninError::Validation(
            "user_id 长度必须在 1 到 64 之间".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reward::RewardMode;
    use crate::settings::MockSettingsProvider;
    use signin_shared::cache::Cache;
    use signin_shared::config::{DatabaseConfig, RedisConfig, TaskConfig};
    use sqlx::postgres::PgPoolOptions;
    use uuid::Uuid;

    /// 懒连接的依赖：功能开关和参数校验在触达数据库之前完成，
    /// 相关用例不需要真实的 Postgres/Redis。
    fn lazy_service(settings: MockSettingsProvider) -> SigninService {
        let pool = PgPoolOptions::new()
            .connect_lazy(&DatabaseConfig::default().url)
            .unwrap();
        let cache = Cache::new(&RedisConfig::default()).unwrap();
        SigninService::new(
            pool,
            RankingStore::new(cache.clone()),
            LockManager::with_defaults(cache.client().clone()),
            Arc::new(settings),
            Arc::new(TaskManager::new(cache, TaskConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_signin_rejected_when_feature_disabled() {
        let mut settings = MockSettingsProvider::new();
        settings.expect_signin_settings().returning(|| {
            Ok(SigninSettings {
                enabled: false,
                ..SigninSettings::default()
            })
        });

        let service = lazy_service(settings);
        let err = service.signin("u-1").await.unwrap_err();
        assert!(matches!(err, SigninError::FeatureDisabled));
    }

    #[tokio::test]
    async fn test_signin_rejects_invalid_user_id() {
        let service = lazy_service(MockSettingsProvider::new());

        let err = service.signin("").await.unwrap_err();
        assert!(matches!(err, SigninError::Validation(_)));

        let long_id = "u".repeat(65);
        let err = service.signin(&long_id).await.unwrap_err();
        assert!(matches!(err, SigninError::Validation(_)));
    }

    async fn integration_service(reward: RewardMode) -> SigninService {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&DatabaseConfig::default().url)
            .await
            .unwrap();
        let cache = Cache::new(&RedisConfig::default()).unwrap();

        let mut settings = MockSettingsProvider::new();
        settings.expect_signin_settings().returning(move || {
            Ok(SigninSettings {
                enabled: true,
                reward: reward.clone(),
                experience_reward: 0,
            })
        });

        SigninService::new(
            pool,
            RankingStore::new(cache.clone()),
            LockManager::with_defaults(cache.client().clone()),
            Arc::new(settings),
            Arc::new(TaskManager::new(cache, TaskConfig::default())),
        )
    }

    #[tokio::test]
    #[ignore] // 需要数据库和 Redis 连接
    async fn test_signin_once_per_day() {
        let service = integration_service(RewardMode::Fixed { amount: 10 }).await;
        let user_id = Uuid::new_v4().to_string();

        let outcome = service.signin(&user_id).await.unwrap();
        assert_eq!(outcome.reward, 10);
        assert_eq!(outcome.continuous_days, 1);
        assert_eq!(outcome.total_days, 1);

        // 同日重复签到被拒绝
        let err = service.signin(&user_id).await.unwrap_err();
        assert!(matches!(err, SigninError::AlreadySignedIn));

        // 状态与余额随之更新
        let status = service.get_status(&user_id).await.unwrap();
        assert!(status.signed_today);
        assert_eq!(status.points_balance, 10);
    }

    #[tokio::test]
    #[ignore] // 需要数据库和 Redis 连接
    async fn test_concurrent_signin_single_success() {
        let service =
            Arc::new(integration_service(RewardMode::Fixed { amount: 10 }).await);
        let user_id = Uuid::new_v4().to_string();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = service.clone();
            let user_id = user_id.clone();
            handles.push(tokio::spawn(
                async move { service.signin(&user_id).await },
            ));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        // 并发请求中恰好一次成功
        assert_eq!(successes, 1);

        let logs = service
            .balance_logs(&user_id, Some(BalanceType::Points), 10, 0)
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].amount, 10);
    }

    #[tokio::test]
    #[ignore] // 需要数据库和 Redis 连接
    async fn test_status_of_new_user_is_zero() {
        let service = integration_service(RewardMode::Fixed { amount: 10 }).await;
        let status = service
            .get_status(&Uuid::new_v4().to_string())
            .await
            .unwrap();

        assert!(!status.signed_today);
        assert_eq!(status.continuous_days, 0);
        assert_eq!(status.total_days, 0);
        assert_eq!(status.points_balance, 0);
        assert!(status.last_signin_date.is_none());
    }
}
