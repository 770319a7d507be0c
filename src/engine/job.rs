//! Job 句柄与等待工具
//!
//! Engine 的所有异步操作都返回一个 Job；`Job::wait` 是阻塞调用，
//! 这里统一放到 `spawn_blocking` 上执行，并与取消令牌竞争。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::engine::Tasker;

/// Job 状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Invalid,
}

impl JobStatus {
    /// 是否为终态
    pub fn is_done(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Invalid)
    }

    pub fn succeeded(self) -> bool {
        self == Self::Succeeded
    }
}

/// Engine 返回的异步句柄
pub trait Job: Send + Sync {
    fn id(&self) -> i64;

    /// 非阻塞查询
    fn status(&self) -> JobStatus;

    /// 阻塞直到终态
    fn wait(&self) -> JobStatus;
}

pub type JobHandle = Box<dyn Job>;

/// 轮询结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Done(JobStatus),
    TimedOut,
    Cancelled,
}

/// 在阻塞线程上等待 Job；取消时返回 None（调用方负责下发 Stop）
pub async fn wait_job(job: JobHandle, cancel: &CancellationToken) -> Option<JobStatus> {
    let handle = tokio::task::spawn_blocking(move || job.wait());
    tokio::select! {
        _ = cancel.cancelled() => None,
        joined = handle => Some(joined.unwrap_or_else(|e| {
            tracing::error!("Job wait task aborted: {}", e);
            JobStatus::Invalid
        })),
    }
}

/// 以固定间隔轮询 Job 状态直到终态、超时或取消；每轮都检查取消
pub async fn poll_job(
    job: &dyn Job,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
) -> PollOutcome {
    let deadline = Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        let status = job.status();
        if status.is_done() {
            return PollOutcome::Done(status);
        }
        if Instant::now() >= deadline {
            return PollOutcome::TimedOut;
        }
        tokio::select! {
            _ = cancel.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

/// 在 tasker 上执行一次 pipeline 入口并等待终态，写一条审计日志。
///
/// 取消时向 tasker 下发 Stop 并返回 None。
pub async fn execute_entry(
    tasker: &Arc<dyn Tasker>,
    entry: &str,
    pipeline_override: &str,
    cancel: &CancellationToken,
) -> Option<JobStatus> {
    let started = Instant::now();
    let job = tasker.append_task(entry, pipeline_override);
    let job_id = job.id();
    let status = wait_job(job, cancel).await;

    if status.is_none() {
        let tasker = Arc::clone(tasker);
        // 让 Engine 尽快收尾；结果由 Stop 流程负责
        let _ = tokio::task::spawn_blocking(move || tasker.stop().wait());
    }

    let audit = serde_json::json!({
        "job_id": job_id,
        "entry": entry,
        "status": status.map(|s| format!("{:?}", s)).unwrap_or_else(|| "cancelled".into()),
        "elapsed_ms": started.elapsed().as_millis() as u64,
    });
    tracing::info!(audit = %audit, "job");
    status
}
