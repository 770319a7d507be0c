//! 主控：把一次「开始任务」组装成队列并在后台执行，提供可重入的 Stop
//!
//! 队列约定：前置脚本 → 连接 → 截图探测 → 每个任务一项 → 后置脚本 → 更新检查。

use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::lifecycle::SessionManager;
use crate::core::notify::{Notifier, OnceNotifier, Severity};
use crate::core::queue::{QueueItem, QueueItemKind, TaskQueue};
use crate::core::recovery::retry_with_policy;
use crate::core::scripts::{CommandScriptRunner, NoopUpdateChecker, ScriptPhase, ScriptRunner, UpdateChecker};
use crate::core::session_supervisor::{format_elapsed, SessionSupervisor};
use crate::core::state::RunStatus;
use crate::core::OrchestratorError;
use crate::engine::{execute_entry, JobStatus};
use crate::interface::{OptionCatalog, TaskInstance};
use crate::option::{build_parameters, to_override_json};

/// 队列执行参数
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub continue_on_job_error: bool,
    pub probe_samples: u32,
    pub warn_ms: u64,
    pub error_ms: u64,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            continue_on_job_error: false,
            probe_samples: 4,
            warn_ms: 400,
            error_ms: 800,
        }
    }
}

impl ProcessorSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            continue_on_job_error: cfg.app.continue_on_job_error,
            probe_samples: cfg.performance.samples,
            warn_ms: cfg.performance.warn_ms,
            error_ms: cfg.performance.error_ms,
        }
    }
}

/// Stop 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(RunStatus),
    /// 另一个 Stop 正在进行，本次被忽略
    AlreadyStopping,
    NothingToStop,
}

pub struct Processor {
    session: Arc<SessionManager>,
    catalog: Arc<OptionCatalog>,
    queue: TaskQueue,
    supervisor: SessionSupervisor,
    scripts: Arc<dyn ScriptRunner>,
    updates: Arc<dyn UpdateChecker>,
    notifier: Arc<OnceNotifier>,
    settings: ProcessorSettings,
    stop_lock: tokio::sync::Mutex<()>,
}

impl Processor {
    pub fn new(session: Arc<SessionManager>, catalog: Arc<OptionCatalog>, notifier: Arc<OnceNotifier>) -> Self {
        Self {
            session,
            catalog,
            queue: TaskQueue::new(),
            supervisor: SessionSupervisor::new(),
            scripts: Arc::new(CommandScriptRunner::default()),
            updates: Arc::new(NoopUpdateChecker),
            notifier,
            settings: ProcessorSettings::default(),
            stop_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_settings(mut self, settings: ProcessorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptRunner>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_update_checker(mut self, updates: Arc<dyn UpdateChecker>) -> Self {
        self.updates = updates;
        self
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn status(&self) -> RunStatus {
        self.queue.status()
    }

    pub fn subscribe_status(&self) -> tokio::sync::watch::Receiver<RunStatus> {
        self.queue.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// 当前运行的取消令牌
    pub fn cancel_token(&self) -> CancellationToken {
        self.supervisor.cancel_token()
    }

    pub fn enqueue(&self, item: QueueItem) {
        self.queue.enqueue(item);
    }

    /// 组装队列并在后台执行；结束时以最终状态调用 Stop
    pub fn start(
        self: &Arc<Self>,
        tasks: Vec<TaskInstance>,
        only_connectivity_check: bool,
        check_update_after: bool,
    ) -> JoinHandle<RunStatus> {
        let cancel = self.supervisor.begin();
        self.queue.clear();
        self.build_queue(tasks, only_connectivity_check, check_update_after);
        tracing::info!(items = self.queue.len(), "Starting task queue");

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let status = this.queue.run(&cancel).await;
            match this.stop(status, true).await {
                StopOutcome::Stopped(final_status) => final_status,
                StopOutcome::AlreadyStopping => {
                    // 等待正在进行的 Stop 写入最终状态
                    let _guard = this.stop_lock.lock().await;
                    this.queue.status()
                }
                StopOutcome::NothingToStop => this.queue.status(),
            }
        })
    }

    fn build_queue(&self, tasks: Vec<TaskInstance>, only_connectivity_check: bool, check_update_after: bool) {
        if !only_connectivity_check {
            self.queue.enqueue(self.script_item(ScriptPhase::Pre));
        }

        let session = Arc::clone(&self.session);
        self.queue.enqueue(QueueItem::new("Connect", QueueItemKind::Session, move |cancel| {
            let session = Arc::clone(&session);
            async move { session.ensure_connected(&cancel).await.map(|_| ()) }.boxed()
        }));

        let session = Arc::clone(&self.session);
        let settings = self.settings.clone();
        self.queue.enqueue(QueueItem::new("Performance probe", QueueItemKind::Maintenance, move |cancel| {
            let session = Arc::clone(&session);
            let settings = settings.clone();
            async move {
                let tier = session
                    .probe_performance(settings.probe_samples, settings.warn_ms, settings.error_ms, &cancel)
                    .await;
                tracing::debug!("Performance tier: {:?}", tier);
                if cancel.is_cancelled() {
                    return Err(OrchestratorError::Cancelled);
                }
                Ok(())
            }
            .boxed()
        }));

        if only_connectivity_check {
            return;
        }

        for task in tasks {
            match self.pipeline_item(task) {
                Some(item) => self.queue.enqueue(item),
                None => continue,
            }
        }

        self.queue.enqueue(self.script_item(ScriptPhase::Post));

        if check_update_after {
            let updates = Arc::clone(&self.updates);
            self.queue.enqueue(
                QueueItem::new("Check update", QueueItemKind::Maintenance, move |cancel| {
                    let updates = Arc::clone(&updates);
                    async move { updates.check(&cancel).await }.boxed()
                })
                .update_related(),
            );
        }
    }

    fn script_item(&self, phase: ScriptPhase) -> QueueItem {
        let scripts = Arc::clone(&self.scripts);
        let name = match phase {
            ScriptPhase::Pre => "Pre-script",
            ScriptPhase::Post => "Post-script",
        };
        QueueItem::new(name, QueueItemKind::Maintenance, move |cancel| {
            let scripts = Arc::clone(&scripts);
            async move { scripts.run(phase, &cancel).await }.boxed()
        })
    }

    fn pipeline_item(&self, task: TaskInstance) -> Option<QueueItem> {
        let Some(entry) = task.spec.entry().map(str::to_string) else {
            tracing::warn!(task = %task.name(), "Task has no entry; skipped");
            return None;
        };
        let name = task.spec.display_name().to_string();
        let repeat = task.spec.runs();
        let session = Arc::clone(&self.session);
        let catalog = Arc::clone(&self.catalog);
        let continue_on_error = self.settings.continue_on_job_error;

        let item = QueueItem::new(name, QueueItemKind::Pipeline, move |cancel| {
            let session = Arc::clone(&session);
            let catalog = Arc::clone(&catalog);
            let task = task.clone();
            let entry = entry.clone();
            async move {
                let tasker = session
                    .tasker()
                    .ok_or_else(|| OrchestratorError::ConnectionFailed("no active session".into()))?;
                let document = build_parameters(&task, &catalog);
                let overrides = to_override_json(&document);
                match execute_entry(&tasker, &entry, &overrides, &cancel).await {
                    None => Err(OrchestratorError::Cancelled),
                    Some(JobStatus::Succeeded) => Ok(()),
                    Some(status) if continue_on_error => {
                        tracing::warn!(entry = %entry, "Job finished with {:?}; continuing", status);
                        Ok(())
                    }
                    Some(status) => Err(OrchestratorError::JobFailed { entry, status }),
                }
            }
            .boxed()
        });
        Some(item.with_repeat(repeat))
    }

    /// 可重入 Stop：同一时刻只有一个 Stop 生效
    pub async fn stop(&self, reason: RunStatus, is_final: bool) -> StopOutcome {
        let Ok(_guard) = self.stop_lock.try_lock() else {
            tracing::debug!("Stop already in progress; ignored");
            return StopOutcome::AlreadyStopping;
        };

        if self.supervisor.is_finished() {
            if !is_final {
                self.notifier.add_log("No task to stop", Severity::Info);
            }
            return StopOutcome::NothingToStop;
        }

        self.queue.set_status(RunStatus::Stopping);
        self.supervisor.cancel();
        let dropped = self.queue.clear();
        if dropped > 0 {
            tracing::info!("Discarded {} queued item(s)", dropped);
        }

        let session = Arc::clone(&self.session);
        let aborted = retry_with_policy(
            self.session.retry_table(),
            &CancellationToken::new(),
            "Abort current job",
            |_| {
                let session = Arc::clone(&session);
                async move {
                    match session.abort_current_job().await {
                        JobStatus::Succeeded => Ok(()),
                        status => Err(OrchestratorError::AbortPending(status)),
                    }
                }
            },
        )
        .await;
        if let Err(e) = aborted {
            tracing::error!("Could not abort the running job: {}", e);
        }

        // 用户中止时，启动到一半的 Agent 一并结束；会话保留
        if reason == RunStatus::Stopped && self.session.agent_starting() {
            self.session.kill_agent().await;
        }

        let final_status = match reason {
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Stopped => reason,
            RunStatus::NotStarted | RunStatus::Stopping => RunStatus::Stopped,
        };
        self.announce(final_status);
        self.queue.set_status(final_status);
        self.supervisor.finish();
        StopOutcome::Stopped(final_status)
    }

    fn announce(&self, status: RunStatus) {
        match status {
            RunStatus::Failed => self.notifier.add_log("Task failed", Severity::Error),
            RunStatus::Stopped => self.notifier.add_log("Task stopped", Severity::Warning),
            _ => {
                let elapsed = format_elapsed(self.supervisor.elapsed());
                let text = format!("All tasks completed in {}", elapsed);
                self.notifier.add_log(&text, Severity::Success);
                self.notifier.notify("All tasks completed", &text);
            }
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("status", &self.status())
            .field("queued", &self.queue.len())
            .finish()
    }
}
