//! Redis 任务队列
//!
//! LPUSH 入队；出队用 BLMOVE 把消息原子移入处理中列表，
//! 处理完成（成功、重新入队或进死信）后再确认删除。
//! 进程在处理途中崩溃或被中止时，消息仍留在处理中列表，
//! 由 `reclaim` 退回待处理队列重新投递——至少一次语义。
//! 重试耗尽的消息进入死信队列等待人工处理。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use signin_shared::cache::{Cache, CacheKey};
use signin_shared::error::{Result, SigninError};

/// 任务消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    /// 消息唯一 ID
    pub id: String,
    /// 任务名，用于路由到对应的处理器
    pub name: String,
    /// 任务参数
    pub payload: serde_json::Value,
    /// 已尝试次数（含首次投递）
    pub attempts: u32,
    /// 最大投递次数，耗尽后进死信队列
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn new(name: &str, payload: serde_json::Value, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            payload,
            attempts: 0,
            max_attempts,
            enqueued_at: Utc::now(),
        }
    }
}

/// 已出队、尚未确认的任务
///
/// 原始报文在确认前一直留在处理中列表，确认时按原文匹配删除，
/// 因此这里保存出队时的字符串而不是重新序列化。
pub struct LeasedTask {
    pub message: TaskMessage,
    raw: String,
}

/// 任务队列
#[derive(Clone)]
pub struct TaskQueue {
    cache: Cache,
}

impl TaskQueue {
    pub fn new(cache: Cache) -> Self {
        Self { cache }
    }

    /// 入队
    #[instrument(skip(self, message), fields(task_id = %message.id, task_name = %message.name))]
    pub async fn enqueue(&self, message: &TaskMessage) -> Result<()> {
        let serialized = serde_json::to_string(message)
            .map_err(|e| SigninError::Internal(format!("任务序列化失败: {}", e)))?;
        self.cache.lpush(&CacheKey::task_pending(), &serialized).await
    }

    /// 阻塞式出队
    ///
    /// 消息被原子移入处理中列表，调用方处理完毕后必须 `ack`。
    /// timeout 内无消息返回 None。损坏的消息直接确认删除并告警，
    /// 不让单条坏数据卡死整个消费循环。
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<LeasedTask>> {
        let Some(raw) = self
            .cache
            .blmove(&CacheKey::task_pending(), &CacheKey::task_processing(), timeout)
            .await?
        else {
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(message) => Ok(Some(LeasedTask { message, raw })),
            Err(e) => {
                warn!(error = %e, raw = %raw, "丢弃无法解析的任务消息");
                self.cache.lrem(&CacheKey::task_processing(), &raw).await?;
                Ok(None)
            }
        }
    }

    /// 确认处理完毕，将消息从处理中列表删除
    pub async fn ack(&self, lease: &LeasedTask) -> Result<()> {
        let removed = self.cache.lrem(&CacheKey::task_processing(), &lease.raw).await?;
        if removed == 0 {
            // 消息已被回收重投，后续重复投递由处理器幂等性兜底
            warn!(task_id = %lease.message.id, "确认时消息已不在处理中列表");
        }
        Ok(())
    }

    /// 将处理中列表的全部消息退回待处理队列，返回退回数量
    ///
    /// 启动时调用回收上次进程退出遗留的在途消息；停止时调用
    /// 退回被中止 worker 手里的消息。
    pub async fn reclaim(&self) -> Result<u64> {
        let mut count = 0;
        while self
            .cache
            .lmove(&CacheKey::task_processing(), &CacheKey::task_pending())
            .await?
            .is_some()
        {
            count += 1;
        }
        Ok(count)
    }

    /// 移入死信队列
    #[instrument(skip(self, message), fields(task_id = %message.id, task_name = %message.name))]
    pub async fn push_dead(&self, message: &TaskMessage) -> Result<()> {
        let serialized = serde_json::to_string(message)
            .map_err(|e| SigninError::Internal(format!("任务序列化失败: {}", e)))?;
        self.cache.lpush(&CacheKey::task_dead(), &serialized).await
    }

    /// 待处理队列长度
    pub async fn pending_len(&self) -> Result<u64> {
        self.cache.llen(&CacheKey::task_pending()).await
    }

    /// 处理中列表长度
    pub async fn processing_len(&self) -> Result<u64> {
        self.cache.llen(&CacheKey::task_processing()).await
    }

    /// 死信队列长度
    pub async fn dead_len(&self) -> Result<u64> {
        self.cache.llen(&CacheKey::task_dead()).await
    }
}
