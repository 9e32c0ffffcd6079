//! Redis 缓存管理模块
//!
//! 提供 Redis 连接管理和常用缓存操作封装。除基础的 KV 操作外，
//! 还封装了签到核心依赖的有序集合（排行榜）和列表（任务队列）原语。

use crate::config::RedisConfig;
use crate::error::{Result, SigninError};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{info, instrument};

/// Redis 缓存客户端
#[derive(Clone)]
pub struct Cache {
    client: Client,
}

impl Cache {
    /// 创建 Redis 客户端
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    /// 获取底层客户端（供需要直连 Redis 的组件复用，如分布式锁）
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// 获取连接
    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(SigninError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(SigninError::from)
    }

    // ==================== KV 操作 ====================

    /// 获取值
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await?;

        match value {
            Some(v) => {
                let parsed: T = serde_json::from_str(&v).map_err(|e| {
                    SigninError::Internal(format!("Cache deserialization error: {}", e))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// 设置值
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let serialized = serde_json::to_string(value)
            .map_err(|e| SigninError::Internal(format!("Cache serialization error: {}", e)))?;

        let _: () = conn.set_ex(key, serialized, ttl.as_secs()).await?;
        Ok(())
    }

    /// 删除值
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// 原子性地仅在 key 不存在时设置值，并指定 TTL
    ///
    /// 基于 Redis SET NX EX 实现，适用于分布式幂等检查和互斥控制。
    /// 返回 true 表示设置成功（key 不存在），false 表示 key 已存在。
    pub async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.get_conn().await?;

        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    /// 增量操作
    pub async fn incr(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.get_conn().await?;
        let result: i64 = conn.incr(key, delta).await?;
        Ok(result)
    }

    /// 设置过期时间
    pub async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.expire(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    // ==================== 有序集合（排行榜）====================

    /// 写入/更新成员分值
    ///
    /// ZADD 语义：成员已存在时覆盖分值，不累加。
    pub async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.zadd(key, member, score).await?;
        Ok(())
    }

    /// 按分值降序取前 N 名，返回 (成员, 分值) 列表
    pub async fn zrevrange_withscores(&self, key: &str, count: usize) -> Result<Vec<(String, i64)>> {
        let mut conn = self.get_conn().await?;
        let entries: Vec<(String, i64)> = conn
            .zrevrange_withscores(key, 0, count as isize - 1)
            .await?;
        Ok(entries)
    }

    /// 查询成员的降序名次（0 起始），成员不存在返回 None
    pub async fn zrevrank(&self, key: &str, member: &str) -> Result<Option<u64>> {
        let mut conn = self.get_conn().await?;
        let rank: Option<u64> = conn.zrevrank(key, member).await?;
        Ok(rank)
    }

    /// 查询成员分值，成员不存在返回 None
    pub async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let mut conn = self.get_conn().await?;
        let score: Option<i64> = conn.zscore(key, member).await?;
        Ok(score)
    }

    // ==================== 列表（任务队列）====================

    /// 入队（队首插入）
    pub async fn lpush(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.get_conn().await?;
        let _: () = conn.lpush(key, value).await?;
        Ok(())
    }

    /// 阻塞式地将队尾元素原子移入另一列表头部（BLMOVE RIGHT LEFT）
    ///
    /// 元素在服务端一步完成"弹出 + 暂存"，客户端中途取消或崩溃
    /// 都不会造成元素凭空消失。timeout 内源列表为空时返回 None。
    pub async fn blmove(&self, src: &str, dst: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.get_conn().await?;
        let result: Option<String> = redis::cmd("BLMOVE")
            .arg(src)
            .arg(dst)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(timeout.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(result)
    }

    /// 非阻塞地移动一个队尾元素到另一列表头部，源列表为空返回 None
    pub async fn lmove(&self, src: &str, dst: &str) -> Result<Option<String>> {
        let mut conn = self.get_conn().await?;
        let result: Option<String> = redis::cmd("LMOVE")
            .arg(src)
            .arg(dst)
            .arg("RIGHT")
            .arg("LEFT")
            .query_async(&mut conn)
            .await?;
        Ok(result)
    }

    /// 删除列表中首个与 value 相同的元素，返回删除数量
    pub async fn lrem(&self, key: &str, value: &str) -> Result<u64> {
        let mut conn = self.get_conn().await?;
        let removed: u64 = conn.lrem(key, 1, value).await?;
        Ok(removed)
    }

    /// 队列长度
    pub async fn llen(&self, key: &str) -> Result<u64> {
        let mut conn = self.get_conn().await?;
        let len: u64 = conn.llen(key).await?;
        Ok(len)
    }
}

/// 缓存键生成器
///
/// 签到核心的所有 Redis 键都在这里集中定义，避免各处手拼字符串。
pub struct CacheKey;

impl CacheKey {
    /// 用户签到互斥锁
    pub fn signin_lock(user_id: &str) -> String {
        format!("signin:lock:{}", user_id)
    }

    /// 当日奖励排行榜（按日期区分）
    pub fn daily_ranking(date: &str) -> String {
        format!("signin:rank:daily:{}", date)
    }

    /// 连续签到天数排行榜（全局）
    pub fn continuous_ranking() -> String {
        "signin:rank:continuous".to_string()
    }

    /// 待处理任务队列
    pub fn task_pending() -> String {
        "signin:tasks:pending".to_string()
    }

    /// 处理中任务列表（已出队、尚未确认）
    pub fn task_processing() -> String {
        "signin:tasks:processing".to_string()
    }

    /// 死信任务队列
    pub fn task_dead() -> String {
        "signin:tasks:dead".to_string()
    }

    /// 周期任务的 tick 租约（抑制重叠触发）
    pub fn schedule_lease(task_name: &str) -> String {
        format!("signin:sched:{}", task_name)
    }

    /// 经验发放幂等标记
    pub fn experience_applied(grant_id: &str) -> String {
        format!("signin:exp:applied:{}", grant_id)
    }

    /// 用户累计经验
    pub fn user_experience(user_id: &str) -> String {
        format!("signin:exp:{}", user_id)
    }
}
