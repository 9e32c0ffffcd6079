//! 内置任务处理器
//!
//! `ExperienceGrantHandler`：签到成功后旁路发放经验值；
//! `StatsSyncHandler`：周期性用数据库权威数据重建 Redis 排行榜，
//! 修复主流程中排行榜写入失败造成的偏差。

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use signin_shared::cache::{Cache, CacheKey};
use signin_shared::error::{Result, SigninError};

use crate::ranking::RankingStore;
use crate::repository::{BalanceRepository, SigninRepository};

use super::manager::TaskHandler;

/// 经验发放任务名
pub const TASK_EXPERIENCE_GRANT: &str = "signin.experience";
/// 统计对账任务名
pub const TASK_STATS_SYNC: &str = "signin.stats_sync";

// ---------------------------------------------------------------------------
// ExperienceGrantHandler
// ---------------------------------------------------------------------------

/// 经验发放任务参数
///
/// grant_id 在签到主流程生成并随消息投递，作为幂等键：
/// 队列重复投递同一消息时经验只会累加一次。
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceGrantPayload {
    pub user_id: String,
    /// 同一次签到发放的积分，随消息携带供下游审计，经验发放本身不使用
    #[serde(default)]
    pub reward: i64,
    pub experience: i64,
    pub grant_id: String,
}

/// 经验发放处理器
pub struct ExperienceGrantHandler {
    cache: Cache,
}

impl ExperienceGrantHandler {
    /// 幂等标记保留时长，覆盖消息可能被重放的窗口
    const APPLIED_MARK_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl TaskHandler for ExperienceGrantHandler {
    fn name(&self) -> &str {
        TASK_EXPERIENCE_GRANT
    }

    #[instrument(skip(self, payload))]
    async fn handle(&self, payload: &serde_json::Value) -> Result<()> {
        let grant: ExperienceGrantPayload = serde_json::from_value(payload.clone())
            .map_err(|e| SigninError::Validation(format!("经验发放参数无效: {}", e)))?;

        // 幂等检查：标记写入成功才是首次处理
        let mark_key = CacheKey::experience_applied(&grant.grant_id);
        let first_time = self
            .cache
            .set_nx(&mark_key, &grant.user_id, Self::APPLIED_MARK_TTL)
            .await?;

        if !first_time {
            debug!(grant_id = %grant.grant_id, "经验已发放过，跳过重复消息");
            return Ok(());
        }

        match self
            .cache
            .incr(&CacheKey::user_experience(&grant.user_id), grant.experience)
            .await
        {
            Ok(total) => {
                info!(
                    user_id = %grant.user_id,
                    experience = grant.experience,
                    total,
                    "经验发放完成"
                );
                Ok(())
            }
            Err(e) => {
                // 发放未成功，撤销幂等标记，否则重投递会被标记挡住、这笔经验永久丢失
                if let Err(del_err) = self.cache.delete(&mark_key).await {
                    warn!(
                        grant_id = %grant.grant_id,
                        error = %del_err,
                        "幂等标记撤销失败，该笔经验的重投递将被跳过"
                    );
                }
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StatsSyncHandler
// ---------------------------------------------------------------------------

/// 统计对账任务参数
///
/// date 缺省时对账当天。
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSyncPayload {
    pub date: Option<NaiveDate>,
}

/// 排行榜对账处理器
///
/// 数据库是权威数据源，Redis 排行榜只是投影。
/// 签到主流程的排行榜写入失败不回滚事务，由本任务周期性补齐。
pub struct StatsSyncHandler {
    signin_repo: SigninRepository,
    balance_repo: BalanceRepository,
    ranking: RankingStore,
}

impl StatsSyncHandler {
    pub fn new(
        signin_repo: SigninRepository,
        balance_repo: BalanceRepository,
        ranking: RankingStore,
    ) -> Self {
        Self {
            signin_repo,
            balance_repo,
            ranking,
        }
    }
}

#[async_trait]
impl TaskHandler for StatsSyncHandler {
    fn name(&self) -> &str {
        TASK_STATS_SYNC
    }

    #[instrument(skip(self, payload))]
    async fn handle(&self, payload: &serde_json::Value) -> Result<()> {
        let params: StatsSyncPayload = serde_json::from_value(payload.clone())
            .map_err(|e| SigninError::Validation(format!("对账参数无效: {}", e)))?;
        let date = params.date.unwrap_or_else(|| Utc::now().date_naive());

        // 当日榜：以签到奖励流水为准补齐（ZADD 覆盖语义，天然幂等）
        let rewards = self.balance_repo.signin_rewards_on(date).await?;
        let daily_count = rewards.len();
        for (user_id, amount) in rewards {
            self.ranking.upsert_daily(date, &user_id, amount).await?;
        }

        // 连续榜：以 signin_status 为准全量覆盖
        let statuses = self.signin_repo.all_status().await?;
        let continuous_count = statuses.len();
        for status in statuses {
            self.ranking
                .upsert_continuous(&status.user_id, status.continuous_days as i64)
                .await?;
        }

        info!(
            %date,
            daily_count,
            continuous_count,
            "排行榜对账完成"
        );
        Ok(())
    }
}
