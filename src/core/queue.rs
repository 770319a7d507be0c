//! 任务队列：按顺序执行，遇到第一个非成功状态立即停止
//!
//! 每个 QueueItem 是一个可重复执行的异步闭包；队列状态通过 watch 通道对外可见。

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::core::state::RunStatus;
use crate::core::OrchestratorError;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 队列项类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueItemKind {
    /// 连接 / 会话检查
    Session,
    /// 执行 pipeline 入口
    Pipeline,
    /// 脚本、探测、更新检查
    Maintenance,
}

pub type ItemAction =
    Box<dyn FnMut(CancellationToken) -> BoxFuture<'static, Result<(), OrchestratorError>> + Send>;

pub struct QueueItem {
    pub name: String,
    pub kind: QueueItemKind,
    pub repeat: u32,
    pub update_related: bool,
    action: ItemAction,
}

impl QueueItem {
    pub fn new<F>(name: impl Into<String>, kind: QueueItemKind, action: F) -> Self
    where
        F: FnMut(CancellationToken) -> BoxFuture<'static, Result<(), OrchestratorError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind,
            repeat: 1,
            update_related: false,
            action: Box::new(action),
        }
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat.max(1);
        self
    }

    pub fn update_related(mut self) -> Self {
        self.update_related = true;
        self
    }

    /// 执行 repeat 次；错误按类别折算为终态
    pub async fn run(&mut self, cancel: &CancellationToken) -> RunStatus {
        for round in 1..=self.repeat {
            if cancel.is_cancelled() {
                return RunStatus::Stopped;
            }
            if self.repeat > 1 {
                tracing::info!(item = %self.name, "Round {}/{}", round, self.repeat);
            }
            match (self.action)(cancel.clone()).await {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => return RunStatus::Stopped,
                Err(e) => {
                    tracing::error!(item = %self.name, "Queue item failed: {}", e);
                    return RunStatus::Failed;
                }
            }
        }
        if cancel.is_cancelled() {
            RunStatus::Stopped
        } else {
            RunStatus::Succeeded
        }
    }
}

impl std::fmt::Debug for QueueItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueItem")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("repeat", &self.repeat)
            .finish()
    }
}

/// FIFO 队列
pub struct TaskQueue {
    items: Mutex<VecDeque<QueueItem>>,
    status: watch::Sender<RunStatus>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (status, _) = watch::channel(RunStatus::NotStarted);
        Self {
            items: Mutex::new(VecDeque::new()),
            status,
        }
    }

    pub fn enqueue(&self, item: QueueItem) {
        tracing::debug!(item = %item.name, kind = ?item.kind, "Enqueued");
        lock(&self.items).push_back(item);
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }

    /// 丢弃剩余项
    pub fn clear(&self) -> usize {
        let mut items = lock(&self.items);
        let dropped = items.len();
        items.clear();
        dropped
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    pub fn set_status(&self, status: RunStatus) {
        self.status.send_replace(status);
    }

    /// 依次执行；第一个非 Succeeded 结果成为整体结果，剩余项被丢弃
    pub async fn run(&self, cancel: &CancellationToken) -> RunStatus {
        self.set_status(RunStatus::NotStarted);
        let mut overall = RunStatus::NotStarted;

        loop {
            let next = lock(&self.items).pop_front();
            let Some(mut item) = next else {
                break;
            };
            if cancel.is_cancelled() {
                overall = RunStatus::Stopped;
                break;
            }

            tracing::info!(item = %item.name, "Running queue item");
            let status = item.run(cancel).await;
            if status != RunStatus::Succeeded {
                let dropped = self.clear();
                tracing::warn!(item = %item.name, "Queue halted with {:?}; {} item(s) discarded", status, dropped);
                overall = status;
                break;
            }
        }

        if overall == RunStatus::NotStarted {
            overall = if cancel.is_cancelled() {
                RunStatus::Stopped
            } else {
                RunStatus::Succeeded
            };
        }
        self.set_status(overall);
        overall
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
