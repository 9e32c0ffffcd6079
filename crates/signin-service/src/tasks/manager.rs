//! 任务管理器
//!
//! 持有处理器注册表，启动固定数量的 worker 消费队列，
//! 失败任务按指数退避重新入队，重试耗尽进入死信队列。
//! 周期任务由调度协程触发：每个 tick 先用 SET NX 租约抢占，
//! 多实例部署时同一 tick 只有一个实例投递任务，避免重复触发。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use signin_shared::cache::{Cache, CacheKey};
use signin_shared::config::TaskConfig;
use signin_shared::error::{Result, SigninError};
use signin_shared::retry::RetryPolicy;

use super::queue::{LeasedTask, TaskMessage, TaskQueue};

/// 任务处理器接口
///
/// 队列是至少一次投递，实现必须幂等：同一消息被处理两次
/// 不得产生两次效果。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// 任务名，与 `TaskMessage::name` 对应
    fn name(&self) -> &str;

    /// 处理一条任务
    async fn handle(&self, payload: &serde_json::Value) -> Result<()>;
}

/// 周期任务的触发计划
pub enum Schedule {
    /// 固定间隔
    Every(Duration),
    /// Cron 表达式（UTC）
    Cron(cron::Schedule),
}

impl Schedule {
    /// 距离下一次触发的等待时长
    fn next_delay(&self) -> Duration {
        match self {
            Schedule::Every(interval) => *interval,
            Schedule::Cron(schedule) => schedule
                .upcoming(Utc)
                .next()
                .and_then(|next| (next - Utc::now()).to_std().ok())
                // cron 无后续触发点时退化为长休眠，循环下轮重算
                .unwrap_or(Duration::from_secs(3600)),
        }
    }

    /// tick 租约时长：略短于触发间隔，保证下一个 tick 前租约已过期
    fn lease_ttl(&self) -> Duration {
        let delay = self.next_delay();
        if delay > Duration::from_secs(2) {
            delay - Duration::from_secs(1)
        } else {
            Duration::from_secs(1)
        }
    }
}

struct ScheduledTask {
    name: String,
    schedule: Schedule,
    payload: serde_json::Value,
}

/// 任务管理器
pub struct TaskManager {
    queue: TaskQueue,
    cache: Cache,
    config: TaskConfig,
    retry_policy: RetryPolicy,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    schedules: Vec<ScheduledTask>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stopped: AtomicBool,
    instance_id: String,
}

impl TaskManager {
    pub fn new(cache: Cache, config: TaskConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue: TaskQueue::new(cache.clone()),
            cache,
            config,
            retry_policy: RetryPolicy::default(),
            handlers: HashMap::new(),
            schedules: Vec::new(),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// 注册任务处理器（须在 start 之前完成）
    pub fn register_handler(&mut self, handler: Arc<dyn TaskHandler>) {
        let name = handler.name().to_string();
        info!(task_name = %name, "注册任务处理器");
        self.handlers.insert(name, handler);
    }

    /// 注册周期任务（须在 start 之前完成）
    ///
    /// 每次触发向队列投递一条 name 对应的任务消息，payload 固定。
    pub fn schedule(&mut self, name: &str, schedule: Schedule, payload: serde_json::Value) {
        info!(task_name = %name, "注册周期任务");
        self.schedules.push(ScheduledTask {
            name: name.to_string(),
            schedule,
            payload,
        });
    }

    /// 投递一条任务
    ///
    /// 任务名必须已注册处理器；管理器停止后拒绝新任务。
    #[instrument(skip(self, payload))]
    pub async fn enqueue(&self, name: &str, payload: serde_json::Value) -> Result<String> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SigninError::TaskManagerStopped);
        }
        if !self.handlers.contains_key(name) {
            return Err(SigninError::HandlerNotFound {
                name: name.to_string(),
            });
        }

        let message = TaskMessage::new(name, payload, self.config.max_attempts);
        self.queue.enqueue(&message).await?;
        Ok(message.id)
    }

    /// 启动 worker 与调度协程
    ///
    /// 先回收上次进程退出时遗留在处理中列表的消息，再开始消费。
    pub async fn start(&self) {
        match self.queue.reclaim().await {
            Ok(0) => {}
            Ok(count) => info!(count, "回收上次遗留的在途任务"),
            Err(e) => warn!(error = %e, "在途任务回收失败，消息仍在处理中列表等待下次回收"),
        }

        let handlers = Arc::new(self.handlers.clone());
        let mut handles = self.handles.lock().await;

        for worker_id in 0..self.config.worker_count {
            let worker = Worker {
                id: worker_id,
                queue: self.queue.clone(),
                handlers: handlers.clone(),
                retry_policy: self.retry_policy.clone(),
                poll_timeout: Duration::from_secs(self.config.poll_timeout_seconds),
            };
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(worker.run(shutdown_rx)));
        }

        for task in &self.schedules {
            let scheduler = Scheduler {
                name: task.name.clone(),
                schedule: match &task.schedule {
                    Schedule::Every(d) => Schedule::Every(*d),
                    Schedule::Cron(s) => Schedule::Cron(s.clone()),
                },
                payload: task.payload.clone(),
                queue: self.queue.clone(),
                cache: self.cache.clone(),
                instance_id: self.instance_id.clone(),
                max_attempts: self.config.max_attempts,
            };
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(scheduler.run(shutdown_rx)));
        }

        info!(
            workers = self.config.worker_count,
            schedules = self.schedules.len(),
            "任务管理器已启动"
        );
    }

    /// 停止：先拒绝新任务，通知各协程退出，再在限定时间内等待收尾
    ///
    /// 超时未退出的协程直接中止；被中止 worker 手里的消息
    /// 仍在处理中列表，随后统一退回待处理队列，不会丢失。
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        let deadline = Duration::from_secs(self.config.shutdown_timeout_seconds);
        let mut handles = self.handles.lock().await;

        let drain = async {
            while let Some(handle) = handles.pop() {
                let _ = handle.await;
            }
        };

        if tokio::time::timeout(deadline, drain).await.is_err() {
            warn!("任务收尾超时，中止剩余协程");
            for handle in handles.drain(..) {
                handle.abort();
            }
        }

        match self.queue.reclaim().await {
            Ok(0) => {}
            Ok(count) => info!(count, "在途任务已退回待处理队列"),
            Err(e) => warn!(error = %e, "在途任务回收失败，将在下次启动时回收"),
        }

        info!("任务管理器已停止");
    }
}

// ---------------------------------------------------------------------------
// Worker — 队列消费循环
// ---------------------------------------------------------------------------

struct Worker {
    id: usize,
    queue: TaskQueue,
    handlers: Arc<HashMap<String, Arc<dyn TaskHandler>>>,
    retry_policy: RetryPolicy,
    poll_timeout: Duration,
}

impl Worker {
    async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        info!(worker_id = self.id, "worker 启动");

        // 不在 select 中取消出队：BLMOVE 在服务端完成弹出，客户端
        // 取消会丢掉刚弹出的消息。改为有界阻塞轮询，每轮之间检查
        // 关闭信号，关闭延迟最多一个 poll_timeout。
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.queue.dequeue(self.poll_timeout).await {
                Ok(Some(lease)) => self.process(lease).await,
                Ok(None) => {} // 超时空转，回到循环检查关闭信号
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "出队失败，退避后重试");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(worker_id = self.id, "worker 退出");
    }

    #[instrument(skip(self, lease), fields(worker_id = self.id, task_id = %lease.message.id, task_name = %lease.message.name))]
    async fn process(&self, lease: LeasedTask) {
        let mut message = lease.message.clone();
        message.attempts += 1;

        let Some(handler) = self.handlers.get(&message.name) else {
            warn!("无对应处理器，任务移入死信队列");
            self.move_to_dead(&message, &lease).await;
            return;
        };

        match handler.handle(&message.payload).await {
            Ok(()) => {
                info!(attempts = message.attempts, "任务处理成功");
                self.ack(&lease).await;
            }
            Err(e) if message.attempts < message.max_attempts => {
                let delay = self.retry_policy.delay_for_attempt(message.attempts);
                warn!(
                    error = %e,
                    attempts = message.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "任务处理失败，退避后重新入队"
                );
                tokio::time::sleep(delay).await;
                match self.queue.enqueue(&message).await {
                    Ok(()) => self.ack(&lease).await,
                    Err(e) => {
                        // 不确认，消息留在处理中列表等待回收重投
                        error!(error = %e, "重新入队失败，消息留在处理中列表等待回收");
                    }
                }
            }
            Err(e) => {
                error!(error = %e, attempts = message.attempts, "重试耗尽，任务移入死信队列");
                self.move_to_dead(&message, &lease).await;
            }
        }
    }

    /// 死信写入成功才确认原消息，失败则留待回收重投
    async fn move_to_dead(&self, message: &TaskMessage, lease: &LeasedTask) {
        match self.queue.push_dead(message).await {
            Ok(()) => self.ack(lease).await,
            Err(e) => {
                error!(task_id = %message.id, error = %e, "死信队列写入失败，消息留在处理中列表等待回收");
            }
        }
    }

    async fn ack(&self, lease: &LeasedTask) {
        if let Err(e) = self.queue.ack(lease).await {
            // 确认失败最坏导致一次重复投递，由处理器幂等性兜底
            warn!(task_id = %lease.message.id, error = %e, "任务确认失败");
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler — 周期任务触发
// ---------------------------------------------------------------------------

struct Scheduler {
    name: String,
    schedule: Schedule,
    payload: serde_json::Value,
    queue: TaskQueue,
    cache: Cache,
    instance_id: String,
    max_attempts: u32,
}

impl Scheduler {
    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(task_name = %self.name, "调度协程启动");

        loop {
            let delay = self.schedule.next_delay();

            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(delay) => self.tick().await,
            }
        }

        info!(task_name = %self.name, "调度协程退出");
    }

    /// 单次 tick：抢到租约的实例才投递任务
    async fn tick(&self) {
        let lease_key = CacheKey::schedule_lease(&self.name);
        let ttl = self.schedule.lease_ttl();

        match self.cache.set_nx(&lease_key, &self.instance_id, ttl).await {
            Ok(true) => {
                let message =
                    TaskMessage::new(&self.name, self.payload.clone(), self.max_attempts);
                if let Err(e) = self.queue.enqueue(&message).await {
                    error!(task_name = %self.name, error = %e, "周期任务投递失败");
                }
            }
            Ok(false) => {
                // 本 tick 已被其他实例抢占
            }
            Err(e) => {
                error!(task_name = %self.name, error = %e, "tick 租约获取失败");
            }
        }
    }
}
