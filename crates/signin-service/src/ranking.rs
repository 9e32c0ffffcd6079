//! 排行榜存储
//!
//! 两个 Redis 有序集合：当日奖励榜按日期分键、带过期时间；
//! 连续签到榜全局一个键、长期存在。排行榜是展示性数据，
//! 写入失败不阻断签到主流程，由周期性对账任务兜底重建。

use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::instrument;

use signin_shared::cache::{Cache, CacheKey};
use signin_shared::error::Result;

/// 单条排行榜记录
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    /// 名次，1 起始
    pub rank: u64,
    pub user_id: String,
    /// 当日榜为当日获得积分，连续榜为连续签到天数
    pub score: i64,
}

/// 查询结果的单页上限
pub const MAX_RANKING_LIMIT: usize = 100;

/// 当日榜的保留时长（过期由 Redis 自动清理）
const DAILY_RANKING_TTL: Duration = Duration::from_secs(3 * 24 * 3600);

/// 排行榜存储
#[derive(Clone)]
pub struct RankingStore {
    cache: Cache,
}

impl RankingStore {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    // ==================== 写入 ====================

    /// 更新用户在当日奖励榜的分值
    ///
    /// ZADD 覆盖语义：一天只能签到一次，分值即当日奖励，不存在累加。
    #[instrument(skip(self))]
    pub async fn upsert_daily(&self, date: NaiveDate, user_id: &str, reward: i64) -> Result<()> {
        let key = CacheKey::daily_ranking(&date.to_string());
        self.cache.zadd(&key, user_id, reward).await?;
        // 每次写入都续期，键的生命周期跟随最后一次签到
        self.cache.expire(&key, DAILY_RANKING_TTL).await?;
        Ok(())
    }

    /// 更新用户在连续签到榜的天数
    #[instrument(skip(self))]
    pub async fn upsert_continuous(&self, user_id: &str, continuous_days: i64) -> Result<()> {
        self.cache
            .zadd(&CacheKey::continuous_ranking(), user_id, continuous_days)
            .await
    }

    // ==================== 查询 ====================

    /// 当日奖励榜前 N 名
    pub async fn daily_top(&self, date: NaiveDate, limit: usize) -> Result<Vec<RankingEntry>> {
        let key = CacheKey::daily_ranking(&date.to_string());
        self.top_of(&key, limit).await
    }

    /// 连续签到榜前 N 名
    pub async fn continuous_top(&self, limit: usize) -> Result<Vec<RankingEntry>> {
        self.top_of(&CacheKey::continuous_ranking(), limit).await
    }

    /// 查询用户在当日榜的名次与分值，未上榜返回 None
    pub async fn daily_rank_of(
        &self,
        date: NaiveDate,
        user_id: &str,
    ) -> Result<Option<RankingEntry>> {
        let key = CacheKey::daily_ranking(&date.to_string());
        self.rank_of(&key, user_id).await
    }

    /// 查询用户在连续榜的名次与天数，未上榜返回 None
    pub async fn continuous_rank_of(&self, user_id: &str) -> Result<Option<RankingEntry>> {
        self.rank_of(&CacheKey::continuous_ranking(), user_id).await
    }

    async fn top_of(&self, key: &str, limit: usize) -> Result<Vec<RankingEntry>> {
        let limit = limit.clamp(1, MAX_RANKING_LIMIT);
        let entries = self.cache.zrevrange_withscores(key, limit).await?;

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(idx, (user_id, score))| RankingEntry {
                rank: idx as u64 + 1,
                user_id,
                score,
            })
            .collect())
    }

    async fn rank_of(&self, key: &str, user_id: &str) -> Result<Option<RankingEntry>> {
        let Some(rank) = self.cache.zrevrank(key, user_id).await? else {
            return Ok(None);
        };
        let score = self.cache.zscore(key, user_id).await?.unwrap_or(0);

        Ok(Some(RankingEntry {
            rank: rank + 1,
            user_id: user_id.to_string(),
            score,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signin_shared::config::RedisConfig;
    use uuid::Uuid;

    fn test_store() -> RankingStore {
        RankingStore::new(Cache::new(&RedisConfig::default()).unwrap())
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_daily_ranking_order_and_rank() {
        let store = test_store();
        let day = date("2099-01-01");
        let (a, b, c) = (
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
        );

        store.upsert_daily(day, &a, 10).await.unwrap();
        store.upsert_daily(day, &b, 30).await.unwrap();
        store.upsert_daily(day, &c, 20).await.unwrap();

        let top = store.daily_top(day, 10).await.unwrap();
        let ours: Vec<&RankingEntry> = top
            .iter()
            .filter(|e| e.user_id == a || e.user_id == b || e.user_id == c)
            .collect();

        // 降序排列
        assert_eq!(ours[0].user_id, b);
        assert_eq!(ours[0].score, 30);
        assert_eq!(ours[1].user_id, c);
        assert_eq!(ours[2].user_id, a);

        let rank_b = store.daily_rank_of(day, &b).await.unwrap().unwrap();
        assert_eq!(rank_b.score, 30);
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_continuous_upsert_overwrites_score() {
        let store = test_store();
        let user = Uuid::new_v4().to_string();

        store.upsert_continuous(&user, 5).await.unwrap();
        store.upsert_continuous(&user, 6).await.unwrap();

        let entry = store.continuous_rank_of(&user).await.unwrap().unwrap();
        // ZADD 覆盖而非累加
        assert_eq!(entry.score, 6);
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_rank_of_missing_user_is_none() {
        let store = test_store();
        let result = store
            .continuous_rank_of(&Uuid::new_v4().to_string())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_limit_is_capped() {
        assert_eq!(500_usize.min(MAX_RANKING_LIMIT), 100);
    }
}
