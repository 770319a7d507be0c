//! 主会话生命周期：连接、重连阶梯、Agent 链接、拆除
//!
//! `SessionManager` 独占一个 EngineSession。状态机：
//! Uninitialized → ResourceLoading → ControllerConnecting → Binding → Ready，任一步失败回到 Uninitialized。
//!
//! 拆除顺序固定：先断开 Agent 链接，再结束 Agent 进程，最后停止并释放会话；重复调用是 no-op。

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{keys, SettingsExt, SettingsStore};
use crate::core::agent::{random_identifier, AgentLauncher, CommandLauncher};
use crate::core::maintenance::{AdbMaintenance, DeviceMaintenance, LadderStep};
use crate::core::notify::{Notifier, OnceNotifier, Severity};
use crate::core::recovery::{default_retry_table, retry_with_policy, RetryTable};
use crate::core::state::{ProbeTier, SessionPhase};
use crate::core::OrchestratorError;
use crate::engine::{
    wait_job, AgentClient, AgentProcess, DeviceTarget, Engine, EngineError, EngineEvent,
    EngineSession, JobStatus, Tasker,
};
use crate::interface::AgentConfig;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 会话构建参数
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub resource_paths: Vec<PathBuf>,
    pub target: DeviceTarget,
    pub agent: Option<AgentConfig>,
    pub connect_timeout: Duration,
}

impl SessionSettings {
    pub fn new(resource_paths: Vec<PathBuf>, target: DeviceTarget) -> Self {
        Self {
            resource_paths,
            target,
            agent: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_agent(mut self, agent: Option<AgentConfig>) -> Self {
        self.agent = agent.filter(AgentConfig::is_configured);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// 一次连接尝试的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOutcome {
    pub connected: bool,
    /// 资源加载失败：配置错误，不自动重试
    pub resource_invalid: bool,
    /// false 表示不应进入重连阶梯（Agent 失败、已取消）
    pub should_retry: bool,
    pub error: Option<OrchestratorError>,
}

impl ConnectOutcome {
    fn connected() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    fn failed(error: OrchestratorError) -> Self {
        Self {
            connected: false,
            resource_invalid: matches!(error, OrchestratorError::ResourceInvalid(_)),
            should_retry: matches!(error, OrchestratorError::ConnectionFailed(_)),
            error: Some(error),
        }
    }

    fn into_error(self) -> OrchestratorError {
        self.error
            .unwrap_or_else(|| OrchestratorError::ConnectionFailed("unknown connect failure".into()))
    }
}

#[derive(Default)]
struct AgentSlot {
    client: Option<Arc<dyn AgentClient>>,
    process: Option<Box<dyn AgentProcess>>,
    started: bool,
}

/// 主会话管理器
pub struct SessionManager {
    engine: Arc<dyn Engine>,
    settings: SessionSettings,
    store: Arc<dyn SettingsStore>,
    maintenance: Arc<dyn DeviceMaintenance>,
    launcher: Arc<dyn AgentLauncher>,
    notifier: Arc<OnceNotifier>,
    retry: RetryTable,
    session: Mutex<Option<EngineSession>>,
    agent: Arc<Mutex<AgentSlot>>,
    phase: watch::Sender<SessionPhase>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl SessionManager {
    /// 创建管理器，同时返回 Engine 事件通道的接收端
    pub fn new(
        engine: Arc<dyn Engine>,
        settings: SessionSettings,
        store: Arc<dyn SettingsStore>,
        notifier: Arc<OnceNotifier>,
    ) -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (phase, _) = watch::channel(SessionPhase::Uninitialized);
        let maintenance = Arc::new(AdbMaintenance::new(settings.target.adb_path.clone()));
        let manager = Self {
            engine,
            settings,
            store,
            maintenance,
            launcher: Arc::new(CommandLauncher),
            notifier,
            retry: default_retry_table(),
            session: Mutex::new(None),
            agent: Arc::new(Mutex::new(AgentSlot::default())),
            phase,
            events,
        };
        (manager, rx)
    }

    pub fn with_maintenance(mut self, maintenance: Arc<dyn DeviceMaintenance>) -> Self {
        self.maintenance = maintenance;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn AgentLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_retry_table(mut self, retry: RetryTable) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_table(&self) -> &RetryTable {
        &self.retry
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    fn set_phase(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::debug!("Session phase {:?} -> {:?}", previous, phase);
        }
    }

    pub fn tasker(&self) -> Option<Arc<dyn Tasker>> {
        lock(&self.session).as_ref().map(|s| Arc::clone(s.tasker()))
    }

    pub fn agent_started(&self) -> bool {
        lock(&self.agent).started
    }

    fn ready_tasker(&self) -> Option<Arc<dyn Tasker>> {
        self.tasker().filter(|t| t.is_initialized())
    }

    /// 单次连接尝试；已就绪时直接返回
    pub async fn connect(&self, cancel: &CancellationToken) -> ConnectOutcome {
        if cancel.is_cancelled() {
            return ConnectOutcome::failed(OrchestratorError::Cancelled);
        }
        if self.ready_tasker().is_some() {
            return ConnectOutcome::connected();
        }
        if lock(&self.session).is_some() {
            tracing::info!("Existing session is no longer initialized; rebuilding");
            self.teardown(false).await;
        }

        match self.build_session(cancel).await {
            Ok(session) => {
                *lock(&self.session) = Some(session);
                if self.settings.target.is_adb() {
                    self.store.set(keys::DEVICE_SERIAL, self.settings.target.address.clone());
                }
                self.set_phase(SessionPhase::Ready);
                tracing::info!(address = %self.settings.target.address, "Session ready");
                ConnectOutcome::connected()
            }
            Err(err) => {
                self.set_phase(SessionPhase::Uninitialized);
                match &err {
                    OrchestratorError::ResourceInvalid(msg) => {
                        self.notifier.notify_once("resource_invalid", "Resource load failed", msg);
                    }
                    OrchestratorError::AgentFailed(msg) | OrchestratorError::Bridge(msg) => {
                        self.notifier.notify("Agent start failed", msg);
                    }
                    OrchestratorError::Cancelled => {}
                    other => tracing::warn!("Connect attempt failed: {}", other),
                }
                ConnectOutcome::failed(err)
            }
        }
    }

    async fn build_session(&self, cancel: &CancellationToken) -> Result<EngineSession, OrchestratorError> {
        self.set_phase(SessionPhase::ResourceLoading);
        let engine = Arc::clone(&self.engine);
        let paths = self.settings.resource_paths.clone();
        let resource = blocking(cancel, move || engine.load_resource(&paths), drop).await??;

        self.set_phase(SessionPhase::ControllerConnecting);
        let engine = Arc::clone(&self.engine);
        let target = self.settings.target.clone();
        let controller = blocking(cancel, move || engine.create_controller(&target), drop).await??;

        let connect = tokio::time::timeout(
            self.settings.connect_timeout,
            wait_job(controller.connect(), cancel),
        )
        .await;
        match connect {
            Err(_) => {
                return Err(OrchestratorError::ConnectionFailed(format!(
                    "connect to {} timed out",
                    self.settings.target.address
                )))
            }
            Ok(None) => return Err(OrchestratorError::Cancelled),
            Ok(Some(JobStatus::Succeeded)) => {}
            Ok(Some(status)) => {
                return Err(OrchestratorError::ConnectionFailed(format!(
                    "connect to {} finished with {:?}",
                    self.settings.target.address, status
                )))
            }
        }

        self.set_phase(SessionPhase::Binding);
        let engine = Arc::clone(&self.engine);
        let tasker = {
            let resource = Arc::clone(&resource);
            let controller = Arc::clone(&controller);
            blocking(
                cancel,
                move || engine.create_tasker(resource, controller),
                |tasker: Arc<dyn Tasker>| tasker.dispose(),
            )
            .await??
        };
        let session = EngineSession::new(resource, controller, tasker, self.settings.target.address.clone());

        if let Err(err) = self.start_agent(session.tasker(), cancel).await {
            self.release_parts(Some(session), false).await;
            return Err(err);
        }

        session.subscribe(self.events.clone());

        if !session.tasker().is_initialized() {
            self.release_parts(Some(session), false).await;
            return Err(OrchestratorError::ConnectionFailed("tasker failed to initialize".into()));
        }
        Ok(session)
    }

    /// 启动并链接 Agent 子进程；同一进程生命周期内已启动则跳过
    async fn start_agent(&self, tasker: &Arc<dyn Tasker>, cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        let Some(agent) = self.settings.agent.clone() else {
            return Ok(());
        };
        if self.agent_started() {
            return Ok(());
        }

        let identifier = agent
            .identifier
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(random_identifier);
        let client = self.engine.create_agent_client(&identifier, Arc::clone(tasker))?;
        lock(&self.agent).client = Some(Arc::clone(&client));

        let exec = agent.child_exec.clone().unwrap_or_default();
        let args = agent.child_args.clone();
        let timeout = Duration::from_secs(agent.timeout.max(1));
        tracing::info!(identifier = %identifier, "Starting agent: {}", exec);

        retry_with_policy(&self.retry, cancel, "Agent link", |attempt| {
            let client = Arc::clone(&client);
            let slot = Arc::clone(&self.agent);
            let launcher = Arc::clone(&self.launcher);
            let exec = exec.clone();
            let args = args.clone();
            let link_cancel = cancel.child_token();
            async move {
                tracing::debug!("Agent link attempt {}", attempt);
                let guard = link_cancel.clone();
                let handle = tokio::task::spawn_blocking(move || {
                    let mut spawn = |link_id: &str| -> Result<(), EngineError> {
                        let mut slot = lock(&slot);
                        if let Some(mut previous) = slot.process.take() {
                            if !previous.has_exited() {
                                previous.kill();
                            }
                        }
                        slot.process = Some(launcher.spawn(&exec, &args, link_id)?);
                        Ok(())
                    };
                    client.link_start(&mut spawn, &link_cancel)
                });

                let linked = match tokio::time::timeout(timeout, handle).await {
                    Err(_) => {
                        guard.cancel();
                        return Err(OrchestratorError::AgentFailed("agent link timed out".into()));
                    }
                    Ok(Err(e)) => return Err(OrchestratorError::AgentFailed(e.to_string())),
                    Ok(Ok(result)) => result,
                };
                if guard.is_cancelled() {
                    return Err(OrchestratorError::Cancelled);
                }
                match linked {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(OrchestratorError::AgentFailed("agent refused the link".into())),
                    Err(e) => Err(e.into()),
                }
            }
        })
        .await?;

        lock(&self.agent).started = true;
        tracing::info!(identifier = %identifier, "Agent linked");
        Ok(())
    }

    /// 确保会话就绪：普通连接失败时（仅 adb 目标）进入重连阶梯
    pub async fn ensure_connected(&self, cancel: &CancellationToken) -> Result<Arc<dyn Tasker>, OrchestratorError> {
        let outcome = self.connect(cancel).await;
        if outcome.connected {
            return self.tasker_or_lost();
        }
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }
        if outcome.resource_invalid || !outcome.should_retry {
            return Err(outcome.into_error());
        }
        if !self.settings.target.is_adb() {
            let err = outcome.into_error();
            self.notifier.notify("Connection failed", &err.to_string());
            return Err(err);
        }
        self.run_ladder(cancel).await
    }

    async fn run_ladder(&self, cancel: &CancellationToken) -> Result<Arc<dyn Tasker>, OrchestratorError> {
        let steps = LadderStep::enabled_steps(self.store.as_ref());
        for step in steps {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            tracing::info!(step = step.label(), "Trying connection recovery step");
            if let Err(e) = self.maintenance.run_step(step, &self.settings.target, cancel).await {
                if e.is_cancellation() {
                    return Err(e);
                }
                tracing::warn!(step = step.label(), "Recovery step reported: {}", e);
            }
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }

            let outcome = self.connect(cancel).await;
            if outcome.connected {
                tracing::info!(step = step.label(), "Reconnected");
                return self.tasker_or_lost();
            }
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
            if outcome.resource_invalid || !outcome.should_retry {
                return Err(outcome.into_error());
            }
        }

        let message = format!("cannot connect to {}", self.settings.target.address);
        self.notifier.notify("Connection failed", &message);
        Err(OrchestratorError::ConnectionFailed(message))
    }

    fn tasker_or_lost(&self) -> Result<Arc<dyn Tasker>, OrchestratorError> {
        self.tasker()
            .ok_or_else(|| OrchestratorError::ConnectionFailed("session lost after connect".into()))
    }

    /// 正常断开
    pub async fn disconnect(&self) {
        self.teardown(false).await;
    }

    /// 强制结束：不等待正在运行的任务
    pub async fn force_kill(&self) {
        self.teardown(true).await;
    }

    async fn teardown(&self, force: bool) {
        let session = lock(&self.session).take();
        self.release_parts(session, force).await;
        self.set_phase(SessionPhase::Uninitialized);
    }

    /// 断开 Agent → 结束进程 → 释放会话
    async fn release_parts(&self, session: Option<EngineSession>, force: bool) {
        let (client, process) = {
            let mut slot = lock(&self.agent);
            slot.started = false;
            (slot.client.take(), slot.process.take())
        };
        if client.is_none() && process.is_none() && session.is_none() {
            tracing::debug!("Session already torn down");
            return;
        }

        let released = tokio::task::spawn_blocking(move || {
            stop_agent(client, process);
            if let Some(session) = session {
                if force {
                    session.force_release();
                } else {
                    session.release();
                }
            }
        })
        .await;
        if let Err(e) = released {
            tracing::error!("Session teardown task failed: {}", e);
        }
    }

    /// Agent 已创建客户端或进程、但尚未链接完成
    pub fn agent_starting(&self) -> bool {
        let slot = lock(&self.agent);
        !slot.started && (slot.client.is_some() || slot.process.is_some())
    }

    /// 断开 Agent 链接并结束其进程；会话保持不变
    pub async fn kill_agent(&self) {
        let (client, process) = {
            let mut slot = lock(&self.agent);
            slot.started = false;
            (slot.client.take(), slot.process.take())
        };
        if client.is_none() && process.is_none() {
            return;
        }
        tracing::info!("Killing agent");
        if let Err(e) = tokio::task::spawn_blocking(move || stop_agent(client, process)).await {
            tracing::error!("Agent kill task failed: {}", e);
        }
    }

    /// 中止当前 Engine 任务；没有会话时视为成功
    pub async fn abort_current_job(&self) -> JobStatus {
        let Some(tasker) = self.tasker() else {
            return JobStatus::Succeeded;
        };
        tokio::task::spawn_blocking(move || tasker.stop().wait())
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Abort task failed: {}", e);
                JobStatus::Invalid
            })
    }

    /// 截图耗时探测；无会话、被取消或全部失败时返回 None
    pub async fn probe_performance(
        &self,
        samples: u32,
        warn_ms: u64,
        error_ms: u64,
        cancel: &CancellationToken,
    ) -> Option<ProbeTier> {
        let controller = lock(&self.session).as_ref().map(|s| Arc::clone(s.controller()))?;
        let mut timings = Vec::new();
        for _ in 0..samples.max(1) {
            let started = Instant::now();
            match wait_job(controller.screencap(), cancel).await {
                None => return None,
                Some(JobStatus::Succeeded) => timings.push(started.elapsed().as_millis() as u64),
                Some(status) => tracing::warn!("Screencap sample finished with {:?}", status),
            }
        }
        if timings.is_empty() {
            return None;
        }

        let average = timings.iter().sum::<u64>() / timings.len() as u64;
        let tier = ProbeTier::classify(average, warn_ms, error_ms);
        let text = format!("Screencap average {} ms over {} samples", average, timings.len());
        match tier {
            ProbeTier::Normal => self.notifier.add_log(&text, Severity::Info),
            ProbeTier::Warning => self.notifier.add_log(&text, Severity::Warning),
            ProbeTier::Error => self.notifier.add_log(&text, Severity::Error),
        }
        Some(tier)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("target", &self.settings.target.address)
            .field("phase", &self.phase())
            .finish()
    }
}

/// 先断开链接，再结束仍在运行的进程（阻塞）
fn stop_agent(client: Option<Arc<dyn AgentClient>>, process: Option<Box<dyn AgentProcess>>) {
    if let Some(client) = client {
        client.link_stop();
    }
    if let Some(mut process) = process {
        if !process.has_exited() {
            tracing::info!(pid = ?process.id(), "Killing agent process");
            process.kill();
        }
    }
}

/// 在阻塞线程上执行 Engine 调用，与取消竞争
///
/// 取消时仍等待调用返回，并用 `discard` 处理已创建的句柄。
async fn blocking<T, F, D>(
    cancel: &CancellationToken,
    f: F,
    discard: D,
) -> Result<Result<T, EngineError>, OrchestratorError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
    D: FnOnce(T) + Send + 'static,
{
    let mut handle = tokio::task::spawn_blocking(f);
    tokio::select! {
        joined = &mut handle => joined.map_err(|e| OrchestratorError::ConnectionFailed(format!("engine call aborted: {}", e))),
        _ = cancel.cancelled() => {
            if let Ok(Ok(value)) = handle.await {
                if let Err(e) = tokio::task::spawn_blocking(move || discard(value)).await {
                    tracing::error!("Discarding abandoned engine handle failed: {}", e);
                }
            }
            Err(OrchestratorError::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySettings;
    use crate::core::notify::RecordingNotifier;
    use crate::core::recovery::{Backoff, RetryPolicy};
    use crate::core::ErrorClass;
    use crate::engine::mock::{CallLog, MockEngine, MockLauncher, MockMaintenance};

    struct Harness {
        manager: SessionManager,
        engine: MockEngine,
        log: CallLog,
        store: Arc<MemorySettings>,
        notes: Arc<RecordingNotifier>,
    }

    fn harness(agent: bool) -> Harness {
        let log = CallLog::default();
        let engine = MockEngine::with_log(log.clone());
        let store = Arc::new(MemorySettings::default());
        let notes = Arc::new(RecordingNotifier::default());
        let agent_cfg = agent.then(|| AgentConfig {
            child_exec: Some("agent-bin".into()),
            identifier: Some("fixedid1".into()),
            ..Default::default()
        });
        let settings = SessionSettings::new(vec![PathBuf::from("res")], DeviceTarget::adb("127.0.0.1:5555"))
            .with_agent(agent_cfg);
        let (manager, _rx) = SessionManager::new(
            Arc::new(engine.clone()),
            settings,
            store.clone(),
            Arc::new(OnceNotifier::new(notes.clone())),
        );
        let manager = manager
            .with_maintenance(Arc::new(MockMaintenance::new(log.clone())))
            .with_launcher(Arc::new(MockLauncher::new(log.clone())))
            .with_retry_table(
                RetryTable::empty().with(ErrorClass::Bridge, RetryPolicy::new(3, Backoff::Fixed(Duration::from_millis(1)))),
            );
        Harness {
            manager,
            engine,
            log,
            store,
            notes,
        }
    }

    #[tokio::test]
    async fn test_connect_reaches_ready_and_persists_serial() {
        let h = harness(false);
        let outcome = h.manager.connect(&CancellationToken::new()).await;
        assert!(outcome.connected);
        assert_eq!(h.manager.phase(), SessionPhase::Ready);
        assert_eq!(h.store.get_string(keys::DEVICE_SERIAL).as_deref(), Some("127.0.0.1:5555"));
        assert_eq!(h.log.count("set_callback:"), 1);

        // 已就绪时不重建
        assert!(h.manager.connect(&CancellationToken::new()).await.connected);
        assert_eq!(h.log.count("load_resource"), 1);
    }

    #[tokio::test]
    async fn test_resource_invalid_never_enters_ladder() {
        let h = harness(false);
        h.engine.fail_resource_load();
        let result = h.manager.ensure_connected(&CancellationToken::new()).await;
        assert!(matches!(result, Err(OrchestratorError::ResourceInvalid(_))));
        assert_eq!(h.log.count("ladder:"), 0);
        assert_eq!(h.manager.phase(), SessionPhase::Uninitialized);

        let _ = h.manager.ensure_connected(&CancellationToken::new()).await;
        assert_eq!(h.notes.notifications().len(), 1);
    }

    #[tokio::test]
    async fn test_bridge_errors_are_retried() {
        let h = harness(true);
        h.engine.fail_bridge(2);
        let outcome = h.manager.connect(&CancellationToken::new()).await;
        assert!(outcome.connected);
        assert_eq!(h.log.count("link_start"), 3);
        assert!(h.manager.agent_started());
    }

    #[tokio::test]
    async fn test_fatal_agent_error_disables_retry() {
        let h = harness(true);
        h.engine.fail_agent_fatally();
        let outcome = h.manager.connect(&CancellationToken::new()).await;
        assert!(!outcome.connected);
        assert!(!outcome.should_retry);
        assert_eq!(h.log.count("link_start"), 1);

        let result = h.manager.ensure_connected(&CancellationToken::new()).await;
        assert!(matches!(result, Err(OrchestratorError::AgentFailed(_))));
        assert_eq!(h.log.count("ladder:"), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let h = harness(true);
        assert!(h.manager.connect(&CancellationToken::new()).await.connected);
        h.manager.disconnect().await;
        h.manager.disconnect().await;
        assert_eq!(h.log.count("dispose:"), 1);
        assert_eq!(h.log.count("link_stop"), 1);
        assert!(!h.manager.agent_started());
        assert_eq!(h.manager.phase(), SessionPhase::Uninitialized);
    }

    #[tokio::test]
    async fn test_abort_without_session_succeeds() {
        let h = harness(false);
        assert_eq!(h.manager.abort_current_job().await, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_probe_reports_normal_tier() {
        let h = harness(false);
        h.manager.connect(&CancellationToken::new()).await;
        let tier = h
            .manager
            .probe_performance(4, 400, 800, &CancellationToken::new())
            .await;
        assert_eq!(tier, Some(ProbeTier::Normal));
        assert_eq!(h.log.count("screencap:"), 4);
    }

    #[tokio::test]
    async fn test_win32_target_skips_ladder() {
        let log = CallLog::default();
        let engine = MockEngine::with_log(log.clone());
        engine.script_connects([false]);
        let target = DeviceTarget {
            kind: crate::engine::ControllerKind::Win32,
            name: "Game".into(),
            address: "UnityWndClass".into(),
            adb_path: None,
            config: serde_json::Value::Null,
        };
        let (manager, _rx) = SessionManager::new(
            Arc::new(engine),
            SessionSettings::new(Vec::new(), target),
            Arc::new(MemorySettings::default()),
            Arc::new(OnceNotifier::new(Arc::new(RecordingNotifier::default()))),
        );
        let manager = manager.with_maintenance(Arc::new(MockMaintenance::new(log.clone())));
        let result = manager.ensure_connected(&CancellationToken::new()).await;
        assert!(matches!(result, Err(OrchestratorError::ConnectionFailed(_))));
        assert_eq!(log.count("ladder:"), 0);
    }
}
