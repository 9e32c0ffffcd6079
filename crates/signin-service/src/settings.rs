//! 签到配置提供者
//!
//! 奖励模式、数值与功能开关由站点管理后台写入 settings 表，
//! 属于读多写少的全局可变配置。这里以注入式的只读 Provider 接口建模，
//! 并提供带 TTL 的缓存装饰器，避免每次签到都查库。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::warn;

use signin_shared::error::Result;

use crate::reward::RewardMode;

/// 配置命名空间
pub const SETTINGS_NAMESPACE: &str = "signin";

/// 签到配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigninSettings {
    /// 功能开关
    pub enabled: bool,
    /// 积分奖励模式
    pub reward: RewardMode,
    /// 每次签到固定发放的经验值
    pub experience_reward: i64,
}

impl Default for SigninSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            reward: RewardMode::Fixed { amount: 10 },
            experience_reward: 5,
        }
    }
}

/// 配置提供者接口
///
/// 签到引擎只依赖这个接口，测试中用 mock 替换，
/// 生产中用 `CachedSettings<DbSettingsProvider>`。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// 读取当前签到配置
    async fn signin_settings(&self) -> Result<SigninSettings>;
}

// ---------------------------------------------------------------------------
// DbSettingsProvider — 从 settings 表读取
// ---------------------------------------------------------------------------

/// 数据库配置提供者
///
/// settings 表按 (namespace, name) 存储字符串值，缺失的键回退到默认值，
/// 保证管理后台尚未写入配置时签到功能仍可用。
pub struct DbSettingsProvider {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct SettingRow {
    name: String,
    value: String,
}

impl DbSettingsProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 将键值对组装为类型化配置
    fn assemble(entries: &HashMap<String, String>) -> SigninSettings {
        let defaults = SigninSettings::default();

        let get_i64 = |name: &str, fallback: i64| -> i64 {
            match entries.get(name) {
                Some(v) => v.parse().unwrap_or_else(|_| {
                    // 坏数据回退到默认值，签到可用性优先于配置正确性
                    warn!(name, value = %v, fallback, "配置值无法解析，使用默认值");
                    fallback
                }),
                None => fallback,
            }
        };

        let enabled = entries
            .get("enabled")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.enabled);

        let reward = match entries.get("reward_mode").map(String::as_str) {
            Some("incremental") => RewardMode::Incremental {
                base: get_i64("incremental_base", 10),
                step: get_i64("incremental_step", 2),
                cycle_length: get_i64("incremental_cycle", 7).max(1),
            },
            Some("random") => {
                let min = get_i64("random_min", 5);
                let max = get_i64("random_max", 15).max(min);
                RewardMode::Random { min, max }
            }
            // 未配置或未知模式一律按固定奖励处理
            _ => RewardMode::Fixed {
                amount: get_i64("fixed_amount", 10),
            },
        };

        SigninSettings {
            enabled,
            reward,
            experience_reward: get_i64("experience_reward", defaults.experience_reward),
        }
    }
}

#[async_trait]
impl SettingsProvider for DbSettingsProvider {
    async fn signin_settings(&self) -> Result<SigninSettings> {
        let rows = sqlx::query_as::<_, SettingRow>(
            r#"
            SELECT name, value
            FROM settings
            WHERE namespace = $1
            "#,
        )
        .bind(SETTINGS_NAMESPACE)
        .fetch_all(&self.pool)
        .await?;

        let entries: HashMap<String, String> =
            rows.into_iter().map(|r| (r.name, r.value)).collect();

        Ok(Self::assemble(&entries))
    }
}

// ---------------------------------------------------------------------------
// CachedSettings — 带 TTL 的缓存装饰器
// ---------------------------------------------------------------------------

/// 配置缓存装饰器
///
/// TTL 内直接返回缓存副本；TTL 过期后重新加载。
/// 刷新失败时继续使用旧值并记录警告——配置读多写少，
/// 短暂的陈旧值好过让签到请求失败。
pub struct CachedSettings<P: SettingsProvider> {
    inner: P,
    ttl: Duration,
    cached: RwLock<Option<(Instant, SigninSettings)>>,
}

impl<P: SettingsProvider> CachedSettings<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// 默认 30 秒 TTL
    pub fn with_default_ttl(inner: P) -> Self {
        Self::new(inner, Duration::from_secs(30))
    }
}

#[async_trait]
impl<P: SettingsProvider> SettingsProvider for CachedSettings<P> {
    async fn signin_settings(&self) -> Result<SigninSettings> {
        {
            let guard = self.cached.read().await;
            if let Some((loaded_at, settings)) = guard.as_ref()
                && loaded_at.elapsed() < self.ttl
            {
                return Ok(settings.clone());
            }
        }

        let mut guard = self.cached.write().await;
        // 双重检查：等待写锁期间可能已有其他请求完成刷新
        if let Some((loaded_at, settings)) = guard.as_ref()
            && loaded_at.elapsed() < self.ttl
        {
            return Ok(settings.clone());
        }

        match self.inner.signin_settings().await {
            Ok(settings) => {
                *guard = Some((Instant::now(), settings.clone()));
                Ok(settings)
            }
            Err(e) => {
                if let Some((_, stale)) = guard.as_ref() {
                    warn!(error = %e, "配置刷新失败，沿用缓存中的旧值");
                    Ok(stale.clone())
                } else {
                    Err(e)
                }
            }
        }
    }
}
