//! 有界通知工作池
//!
//! 非危急通知入队后由固定数量的后台任务投递，首次失败后最多重试 `max_retries` 次，
//! 最终失败只记录错误日志，不回传给触发方。

use crate::notification::{deliver, Notification, NotificationDispatcher};
use clinlab_core::Recipient;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, warn};

/// 工作池参数
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub workers: usize,
    pub capacity: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub delivery_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 1024,
            max_retries: 3,
            retry_backoff: Duration::from_millis(200),
            delivery_timeout: Duration::from_secs(5),
        }
    }
}

/// 投递统计
#[derive(Debug, Default)]
pub struct QueueStats {
    delivered: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl QueueStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// 重试耗尽后放弃的通知数
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// 队列已满被拒绝的通知数
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

struct Job {
    recipient: Recipient,
    notification: Notification,
}

/// 通知队列
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Job>,
    pending: Arc<watch::Sender<usize>>,
    stats: Arc<QueueStats>,
}

impl NotificationQueue {
    /// 启动工作池，需要在 tokio 运行时内调用
    pub fn start(dispatcher: Arc<dyn NotificationDispatcher>, settings: QueueSettings) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>(settings.capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let stats = Arc::new(QueueStats::default());

        for worker_id in 0..settings.workers.max(1) {
            let receiver = receiver.clone();
            let dispatcher = dispatcher.clone();
            let settings = settings.clone();
            let pending = pending.clone();
            let stats = stats.clone();

            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(job) = job else {
                        debug!(worker_id, "Notification worker stopped");
                        break;
                    };

                    Self::process(dispatcher.as_ref(), &settings, &stats, job).await;
                    pending.send_modify(|count| *count = count.saturating_sub(1));
                }
            });
        }

        Self {
            sender,
            pending,
            stats,
        }
    }

    async fn process(
        dispatcher: &dyn NotificationDispatcher,
        settings: &QueueSettings,
        stats: &QueueStats,
        job: Job,
    ) {
        let max_attempts = settings.max_retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let outcome = tokio::time::timeout(
                settings.delivery_timeout,
                deliver(dispatcher, job.recipient, &job.notification),
            )
            .await;

            match outcome {
                Ok(Ok(())) => {
                    stats.delivered.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => last_error = "delivery timed out".to_string(),
            }

            warn!(
                recipient = %job.recipient,
                attempt,
                "Notification {} delivery failed: {}",
                job.notification.kind.as_str(),
                last_error
            );

            if attempt < max_attempts {
                tokio::time::sleep(settings.retry_backoff * attempt).await;
            }
        }

        stats.failed.fetch_add(1, Ordering::Relaxed);
        error!(
            recipient = %job.recipient,
            order_number = %job.notification.order_number,
            "Giving up on notification {} after {} attempts: {}",
            job.notification.kind.as_str(),
            max_attempts,
            last_error
        );
    }

    /// 入队，不等待投递；队列已满时记录错误并丢弃
    pub fn enqueue(&self, recipient: Recipient, notification: Notification) {
        self.pending.send_modify(|count| *count += 1);

        if let Err(e) = self.sender.try_send(Job {
            recipient,
            notification,
        }) {
            self.pending
                .send_modify(|count| *count = count.saturating_sub(1));
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            let job = match e {
                mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
            };
            error!(
                recipient = %job.recipient,
                "Notification queue unavailable, dropping {} for order {}",
                job.notification.kind.as_str(),
                job.notification.order_number
            );
        }
    }

    /// 等待当前已入队的通知全部处理完
    pub async fn wait_idle(&self) {
        let mut receiver = self.pending.subscribe();
        let _ = receiver.wait_for(|count| *count == 0).await;
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}
