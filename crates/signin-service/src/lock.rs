//! 分布式锁
//!
//! 基于 Redis SET NX PX 的租约锁，用于串行化单个用户的签到读-改-写。
//! 租约到期自动释放，持有者崩溃不会永久阻塞其他进程；
//! 释放时用 Lua 脚本校验持有者令牌，防止误删他人后来获取的锁。

use std::time::Duration;

use redis::Client as RedisClient;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use signin_shared::config::LockConfig;
use signin_shared::error::{Result, SigninError};

/// 分布式锁管理器
pub struct LockManager {
    client: RedisClient,
    config: LockConfig,
    /// 实例唯一标识，用于区分不同服务实例持有的锁
    instance_id: String,
}

impl LockManager {
    pub fn new(client: RedisClient, config: LockConfig) -> Self {
        Self {
            client,
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// 使用默认配置创建锁管理器
    pub fn with_defaults(client: RedisClient) -> Self {
        Self::new(client, LockConfig::default())
    }

    /// 默认租约时长
    pub fn default_lease(&self) -> Duration {
        Duration::from_millis(self.config.lease_ms)
    }

    /// 获取锁（有界等待）
    ///
    /// 在配置的重试次数内轮询 SET NX，每次失败后等待固定间隔；
    /// 用尽后返回 `LockTimeout`，调用方可安全退避重试。
    ///
    /// # Arguments
    /// - `key`: 锁的唯一标识
    /// - `lease`: 锁的租约时长（可选，默认使用配置中的 lease_ms）
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn acquire(&self, key: &str, lease: Option<Duration>) -> Result<LockGuard> {
        let lease = lease.unwrap_or_else(|| self.default_lease());
        // token 格式: instance_id:uuid，确保锁的唯一归属
        let token = format!("{}:{}", self.instance_id, Uuid::new_v4());

        // 首次尝试 + retry_count 次重试
        for attempt in 0..=self.config.retry_count {
            if self.try_set_nx(key, &token, lease).await? {
                debug!(key = %key, token = %token, attempt, "锁已获取");
                return Ok(LockGuard::new(
                    key.to_string(),
                    token,
                    self.client.clone(),
                ));
            }

            if attempt < self.config.retry_count {
                debug!(
                    key = %key,
                    attempt,
                    retry_delay_ms = self.config.retry_delay_ms,
                    "锁被占用，等待后重试"
                );
                tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
            }
        }

        Err(SigninError::LockTimeout {
            key: key.to_string(),
        })
    }

    /// 尝试获取锁，不重试
    ///
    /// 锁不可用时立即返回 None，不会阻塞等待。
    pub async fn try_acquire(&self, key: &str, lease: Option<Duration>) -> Result<Option<LockGuard>> {
        let lease = lease.unwrap_or_else(|| self.default_lease());
        let token = format!("{}:{}", self.instance_id, Uuid::new_v4());

        if self.try_set_nx(key, &token, lease).await? {
            Ok(Some(LockGuard::new(
                key.to_string(),
                token,
                self.client.clone(),
            )))
        } else {
            Ok(None)
        }
    }

    /// 单次 SET NX PX 原子操作
    async fn try_set_nx(&self, key: &str, token: &str, lease: Duration) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // SET key value NX PX milliseconds
        // NX: 只在 key 不存在时设置；PX: 毫秒级过期
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }
}

/// 锁守卫
///
/// 持有锁的 RAII 包装器。建议使用 `release()` 显式释放——
/// Drop 无法执行异步操作，只能依赖租约到期，并记录警告日志。
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    token: String,
    client: RedisClient,
    /// 标记锁是否已被释放，避免 Drop 时误报
    released: bool,
}

impl LockGuard {
    fn new(key: String, token: String, client: RedisClient) -> Self {
        Self {
            key,
            token,
            client,
            released: false,
        }
    }

    /// 获取锁的 key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 获取持有者令牌
    pub fn token(&self) -> &str {
        &self.token
    }

    /// 显式释放锁
    ///
    /// Lua 脚本原子地校验令牌再删除。令牌不匹配说明本租约已过期、
    /// 锁被后来者持有，此时按无操作处理（记录警告），绝不误删。
    #[instrument(skip(self))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;

        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let script = r#"
            if redis.call("get", KEYS[1]) == ARGV[1] then
                return redis.call("del", KEYS[1])
            else
                return 0
            end
        "#;

        let result: i32 = redis::Script::new(script)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut conn)
            .await?;

        if result == 0 {
            warn!(
                key = %self.key,
                token = %self.token,
                "锁已过期或被其他持有者占有，按无操作处理"
            );
        } else {
            debug!(key = %self.key, "锁已释放");
        }

        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            // Drop 中无法执行异步操作，锁将通过租约到期自动释放
            warn!(
                lock_key = %self.key,
                token = %self.token,
                "LockGuard 未显式释放即被丢弃，锁将在租约到期后自动失效"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signin_shared::config::RedisConfig;

    fn test_client() -> RedisClient {
        RedisClient::open(RedisConfig::default().url.as_str()).unwrap()
    }

    #[test]
    fn test_lock_config_default() {
        let config = LockConfig::default();
        assert_eq!(config.lease_ms, 10_000);
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.retry_delay_ms, 100);
    }

    #[test]
    fn test_token_format() {
        // token 格式：instance_id:uuid，两段都是合法 UUID
        let instance_id = Uuid::new_v4().to_string();
        let token = format!("{}:{}", instance_id, Uuid::new_v4());

        let parts: Vec<&str> = token.split(':').collect();
        assert_eq!(parts.len(), 2);
        assert!(Uuid::parse_str(parts[0]).is_ok());
        assert!(Uuid::parse_str(parts[1]).is_ok());
    }

    #[test]
    fn test_instance_id_uniqueness() {
        let m1 = LockManager::with_defaults(test_client());
        let m2 = LockManager::with_defaults(test_client());
        assert_ne!(m1.instance_id, m2.instance_id);
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_acquire_release_roundtrip() {
        let manager = LockManager::with_defaults(test_client());
        let key = format!("signin:lock:test:{}", Uuid::new_v4());

        let guard = manager
            .acquire(&key, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        // 持有期间二次获取应失败
        assert!(manager.try_acquire(&key, None).await.unwrap().is_none());

        guard.release().await.unwrap();

        // 释放后可再次获取
        let guard2 = manager.try_acquire(&key, None).await.unwrap();
        assert!(guard2.is_some());
        guard2.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // 需要 Redis 连接
    async fn test_acquire_times_out_when_held() {
        let config = LockConfig {
            lease_ms: 5_000,
            retry_count: 2,
            retry_delay_ms: 10,
        };
        let manager = LockManager::new(test_client(), config);
        let key = format!("signin:lock:test:{}", Uuid::new_v4());

        let guard = manager.acquire(&key, None).await.unwrap();

        let err = manager.acquire(&key, None).await.unwrap_err();
        assert!(matches!(err, SigninError::LockTimeout { .. }));

        guard.release().await.unwrap();
    }
}
