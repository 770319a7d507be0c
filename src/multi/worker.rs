//! Worker：一个账号 + 一个 EngineSession + 一组任务
//!
//! 初始化（构建会话、等待就绪、验证截图）由调度器串行调用；执行阶段可以并行。
//! 单个任务失败只记录，继续执行下一个任务。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::OrchestratorError;
use crate::engine::{
    execute_entry, poll_job, DeviceTarget, Engine, EngineError, EngineSession, JobStatus, PollOutcome,
};
use crate::interface::{OptionCatalog, TaskInstance};
use crate::multi::account::{Account, AccountStatus};
use crate::option::{build_parameters, to_override_json};

/// 一个账号与它要执行的任务
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub account: Arc<Account>,
    pub tasks: Vec<TaskInstance>,
}

impl WorkItem {
    pub fn new(account: Arc<Account>, tasks: Vec<TaskInstance>) -> Self {
        Self { account, tasks }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub resource_paths: Vec<PathBuf>,
    pub adb_path: Option<PathBuf>,
    /// 透传给控制器的配置
    pub config: Value,
    pub init_timeout: Duration,
    pub screencap_timeout: Duration,
    pub poll_interval: Duration,
}

impl WorkerSettings {
    pub fn new(resource_paths: Vec<PathBuf>) -> Self {
        Self {
            resource_paths,
            adb_path: None,
            config: Value::Object(Default::default()),
            init_timeout: Duration::from_secs(30),
            screencap_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn from_config(cfg: &AppConfig, resource_paths: Vec<PathBuf>) -> Self {
        Self {
            resource_paths,
            adb_path: cfg.device.adb_path.clone(),
            config: cfg.device.controller_config(),
            init_timeout: Duration::from_secs(cfg.multi.init_timeout_secs),
            screencap_timeout: Duration::from_secs(cfg.multi.screencap_timeout_secs),
            poll_interval: Duration::from_millis(cfg.multi.poll_interval_ms.max(1)),
        }
    }
}

pub struct Worker {
    account: Arc<Account>,
    tasks: Vec<TaskInstance>,
    session: Option<EngineSession>,
}

impl Worker {
    pub fn new(item: WorkItem) -> Self {
        Self {
            account: item.account,
            tasks: item.tasks,
            session: None,
        }
    }

    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// 用 find_devices 匹配序列号；找不到时直接用原始序列号
    fn resolve_target(&self, engine: &dyn Engine, settings: &WorkerSettings) -> DeviceTarget {
        let serial = self.account.serial.as_str();
        match engine.find_devices().into_iter().find(|d| d.address == serial) {
            Some(info) => info.into(),
            None => {
                tracing::debug!(account = %self.account.name, "Device {} not listed; using raw serial", serial);
                DeviceTarget::adb(serial)
                    .with_adb_path(settings.adb_path.clone())
                    .with_config(settings.config.clone())
            }
        }
    }

    /// 构建会话并确认可用：连接成功、Tasker 就绪、截图成功
    pub async fn initialize(
        &mut self,
        engine: &Arc<dyn Engine>,
        settings: &WorkerSettings,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        let target = self.resolve_target(engine.as_ref(), settings);
        tracing::info!(account = %self.account.name, address = %target.address, "Initializing worker");

        let builder = Arc::clone(engine);
        let paths = settings.resource_paths.clone();
        let build_target = target.clone();
        let mut handle =
            tokio::task::spawn_blocking(move || EngineSession::build(builder.as_ref(), &paths, &build_target));
        let joined = tokio::select! {
            joined = &mut handle => joined,
            _ = cancel.cancelled() => {
                // 构建线程无法中断：等它结束并释放产物
                release_late(handle).await;
                return Err(OrchestratorError::Cancelled);
            }
            _ = tokio::time::sleep(settings.init_timeout) => {
                tracing::warn!(account = %self.account.name, "Session build timed out; releasing it in the background");
                tokio::spawn(release_late(handle));
                return Err(OrchestratorError::ConnectionFailed(format!(
                    "session build for {} timed out",
                    target.address
                )));
            }
        };
        let session = joined.map_err(|e| OrchestratorError::ConnectionFailed(format!("session build aborted: {}", e)))??;

        match Self::verify(&session, settings, cancel).await {
            Ok(()) => {
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                release(session).await;
                Err(e)
            }
        }
    }

    async fn verify(
        session: &EngineSession,
        settings: &WorkerSettings,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let connect = session.controller().connect();
        expect_success(
            poll_job(connect.as_ref(), settings.poll_interval, settings.init_timeout, cancel).await,
            "connect",
        )?;

        let deadline = Instant::now() + settings.init_timeout;
        while !session.tasker().is_initialized() {
            if Instant::now() >= deadline {
                return Err(OrchestratorError::ConnectionFailed("tasker not ready in time".into()));
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
                _ = tokio::time::sleep(settings.poll_interval) => {}
            }
        }

        let screencap = session.controller().screencap();
        expect_success(
            poll_job(screencap.as_ref(), settings.poll_interval, settings.screencap_timeout, cancel).await,
            "screencap",
        )?;
        if session.controller().cached_image().map_or(true, |img| img.is_empty()) {
            return Err(OrchestratorError::ConnectionFailed("screencap returned no image".into()));
        }
        Ok(())
    }

    /// 顺序执行全部任务，结束后释放会话
    pub async fn execute(mut self, catalog: Arc<OptionCatalog>, cancel: CancellationToken) -> AccountStatus {
        let account = Arc::clone(&self.account);
        let Some(session) = self.session.take() else {
            account.set_error("worker was not initialized");
            account.set_status(AccountStatus::Failed);
            return AccountStatus::Failed;
        };

        account.set_status(AccountStatus::Running);
        let total = self.tasks.len();
        for (index, task) in self.tasks.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            account.set_current_task(Some(task.spec.display_name().to_string()));
            let Some(entry) = task.spec.entry() else {
                tracing::warn!(account = %account.name, task = %task.name(), "Task has no entry; skipped");
                account.set_progress(index + 1, total);
                continue;
            };

            let overrides = to_override_json(&build_parameters(task, &catalog));
            for _ in 0..task.spec.runs() {
                match execute_entry(session.tasker(), entry, &overrides, &cancel).await {
                    None => break,
                    Some(JobStatus::Succeeded) => {}
                    Some(status) => {
                        tracing::error!(account = %account.name, entry = %entry, "Task failed with {:?}", status);
                        account.set_error(format!("{} finished with {:?}", task.name(), status));
                        account.set_status(AccountStatus::Failed);
                        account.set_status(AccountStatus::Running);
                        break;
                    }
                }
            }
            account.set_progress(index + 1, total);
        }
        account.set_current_task(None);

        release(session).await;

        let status = if cancel.is_cancelled() {
            AccountStatus::Cancelled
        } else {
            AccountStatus::Completed
        };
        account.set_status(status);
        tracing::info!(account = %account.display_name(), "Worker finished: {:?}", status);
        status
    }

    /// 未执行就被丢弃时释放会话
    pub async fn dispose(mut self) {
        if let Some(session) = self.session.take() {
            release(session).await;
        }
    }
}

fn expect_success(outcome: PollOutcome, what: &str) -> Result<(), OrchestratorError> {
    match outcome {
        PollOutcome::Done(JobStatus::Succeeded) => Ok(()),
        PollOutcome::Done(status) => Err(OrchestratorError::ConnectionFailed(format!("{} finished with {:?}", what, status))),
        PollOutcome::TimedOut => Err(OrchestratorError::ConnectionFailed(format!("{} timed out", what))),
        PollOutcome::Cancelled => Err(OrchestratorError::Cancelled),
    }
}

async fn release(session: EngineSession) {
    if let Err(e) = tokio::task::spawn_blocking(move || session.release()).await {
        tracing::error!("Worker session release failed: {}", e);
    }
}

/// 等待被放弃的构建结束；若产出了会话则释放
async fn release_late(handle: JoinHandle<Result<EngineSession, EngineError>>) {
    match handle.await {
        Ok(Ok(session)) => release(session).await,
        Ok(Err(e)) => tracing::debug!("Abandoned session build failed: {}", e),
        Err(e) => tracing::error!("Abandoned session build panicked: {}", e),
    }
}
