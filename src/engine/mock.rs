//! Mock Engine（用于测试与 dry-run，无需原生库）
//!
//! 所有句柄共享一份调用日志 `CallLog`，测试可以据此断言调用顺序；
//! 连接结果、失败入口、Stop 重试次数、桥接异常次数都可以预先编排。

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::agent::AgentLauncher;
use crate::core::maintenance::{DeviceMaintenance, LadderStep};
use crate::core::OrchestratorError;
use crate::engine::{
    AgentClient, AgentProcess, CallbackFn, Controller, DeviceInfo, DeviceTarget, Engine,
    EngineError, ImageBuffer, Job, JobHandle, JobStatus, Resource, Tasker,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 按时间顺序记录的调用
#[derive(Clone, Debug, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// 第一个完全相同条目的位置
    pub fn position(&self, entry: &str) -> Option<usize> {
        lock(&self.0).iter().position(|e| e == entry)
    }

    pub fn positions_with_prefix(&self, prefix: &str) -> Vec<usize> {
        lock(&self.0)
            .iter()
            .enumerate()
            .filter(|(_, e)| e.starts_with(prefix))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.positions_with_prefix(prefix).len()
    }
}

#[derive(Default)]
struct Shared {
    log: CallLog,
    resource_fails: AtomicBool,
    connect_script: Mutex<VecDeque<bool>>,
    unreachable: Mutex<HashSet<String>>,
    failing_entries: Mutex<HashSet<String>>,
    job_delay: Mutex<Duration>,
    stop_delay: Mutex<Duration>,
    build_delay: Mutex<Duration>,
    link_delay: Mutex<Duration>,
    stop_failures: AtomicUsize,
    bridge_failures: AtomicUsize,
    agent_fatal: AtomicBool,
    active_jobs: AtomicUsize,
    peak_jobs: AtomicUsize,
    devices: Mutex<Vec<DeviceInfo>>,
    controllers: Mutex<Vec<Arc<MockController>>>,
    callbacks: Mutex<Vec<CallbackFn>>,
}

/// 可编排的 Engine
#[derive(Clone, Default)]
pub struct MockEngine {
    shared: Arc<Shared>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: CallLog) -> Self {
        Self {
            shared: Arc::new(Shared {
                log,
                ..Default::default()
            }),
        }
    }

    pub fn log(&self) -> CallLog {
        self.shared.log.clone()
    }

    pub fn fail_resource_load(&self) {
        self.shared.resource_fails.store(true, Ordering::SeqCst);
    }

    /// 依次消费的 connect 结果；耗尽后默认成功
    pub fn script_connects(&self, results: impl IntoIterator<Item = bool>) {
        lock(&self.shared.connect_script).extend(results);
    }

    pub fn make_unreachable(&self, address: &str) {
        lock(&self.shared.unreachable).insert(address.to_string());
    }

    pub fn fail_entry(&self, entry: &str) {
        lock(&self.shared.failing_entries).insert(entry.to_string());
    }

    pub fn set_job_delay(&self, delay: Duration) {
        *lock(&self.shared.job_delay) = delay;
    }

    pub fn set_stop_delay(&self, delay: Duration) {
        *lock(&self.shared.stop_delay) = delay;
    }

    /// create_tasker 阻塞的时长
    pub fn set_build_delay(&self, delay: Duration) {
        *lock(&self.shared.build_delay) = delay;
    }

    /// link_start 启动子进程后阻塞的时长
    pub fn set_link_delay(&self, delay: Duration) {
        *lock(&self.shared.link_delay) = delay;
    }

    /// 前 n 次 Stop 返回非成功状态
    pub fn fail_stops(&self, n: usize) {
        self.shared.stop_failures.store(n, Ordering::SeqCst);
    }

    /// 前 n 次 link_start 抛出桥接异常
    pub fn fail_bridge(&self, n: usize) {
        self.shared.bridge_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_agent_fatally(&self) {
        self.shared.agent_fatal.store(true, Ordering::SeqCst);
    }

    pub fn add_device(&self, info: DeviceInfo) {
        lock(&self.shared.devices).push(info);
    }

    /// 同时处于 wait 中的任务 Job 的峰值
    pub fn peak_concurrent_jobs(&self) -> usize {
        self.shared.peak_jobs.load(Ordering::SeqCst)
    }

    /// 模拟原生回调
    pub fn emit_callback(&self, message: &str, details: &str) {
        for callback in lock(&self.shared.callbacks).iter() {
            callback(message, details);
        }
    }
}

impl Engine for MockEngine {
    fn load_resource(&self, paths: &[PathBuf]) -> Result<Arc<dyn Resource>, EngineError> {
        self.shared.log.record("load_resource");
        if self.shared.resource_fails.load(Ordering::SeqCst) {
            return Err(EngineError::ResourceLoad(format!("cannot load {:?}", paths)));
        }
        Ok(Arc::new(MockResource {
            paths: paths.to_vec(),
        }))
    }

    fn create_controller(&self, target: &DeviceTarget) -> Result<Arc<dyn Controller>, EngineError> {
        self.shared.log.record(format!("create_controller:{}", target.address));
        let controller = Arc::new(MockController {
            shared: Arc::clone(&self.shared),
            address: target.address.clone(),
            connected: AtomicBool::new(false),
        });
        lock(&self.shared.controllers).push(Arc::clone(&controller));
        Ok(controller)
    }

    fn create_tasker(
        &self,
        _resource: Arc<dyn Resource>,
        controller: Arc<dyn Controller>,
    ) -> Result<Arc<dyn Tasker>, EngineError> {
        let delay = *lock(&self.shared.build_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let wanted = Arc::as_ptr(&controller) as *const u8;
        let mock = lock(&self.shared.controllers)
            .iter()
            .find(|c| Arc::as_ptr(c) as *const u8 == wanted)
            .cloned()
            .ok_or_else(|| EngineError::Tasker("controller not created by this engine".into()))?;
        self.shared.log.record(format!("create_tasker:{}", mock.address));
        Ok(Arc::new(MockTasker {
            shared: Arc::clone(&self.shared),
            controller: mock,
            disposed: AtomicBool::new(false),
        }))
    }

    fn create_agent_client(
        &self,
        identifier: &str,
        _tasker: Arc<dyn Tasker>,
    ) -> Result<Arc<dyn AgentClient>, EngineError> {
        self.shared.log.record("agent_create");
        Ok(Arc::new(MockAgentClient {
            shared: Arc::clone(&self.shared),
            identifier: identifier.to_string(),
        }))
    }

    fn find_devices(&self) -> Vec<DeviceInfo> {
        lock(&self.shared.devices).clone()
    }
}

struct MockResource {
    paths: Vec<PathBuf>,
}

impl Resource for MockResource {
    fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

/// 立即完成（或阻塞 delay 后完成）的 Job
pub struct MockJob {
    id: i64,
    outcome: JobStatus,
    delay: Duration,
    shared: Option<Arc<Shared>>,
}

impl MockJob {
    pub fn done(outcome: JobStatus) -> Self {
        Self {
            id: 0,
            outcome,
            delay: Duration::ZERO,
            shared: None,
        }
    }
}

impl Job for MockJob {
    fn id(&self) -> i64 {
        self.id
    }

    fn status(&self) -> JobStatus {
        self.outcome
    }

    fn wait(&self) -> JobStatus {
        if let Some(shared) = &self.shared {
            let now = shared.active_jobs.fetch_add(1, Ordering::SeqCst) + 1;
            shared.peak_jobs.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            shared.active_jobs.fetch_sub(1, Ordering::SeqCst);
        } else if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.outcome
    }
}

struct MockController {
    shared: Arc<Shared>,
    address: String,
    connected: AtomicBool,
}

impl Controller for MockController {
    fn connect(&self) -> JobHandle {
        self.shared.log.record(format!("connect:{}", self.address));
        let reachable = !lock(&self.shared.unreachable).contains(&self.address);
        let scripted = lock(&self.shared.connect_script).pop_front().unwrap_or(true);
        let ok = reachable && scripted;
        self.connected.store(ok, Ordering::SeqCst);
        Box::new(MockJob::done(if ok {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        }))
    }

    fn screencap(&self) -> JobHandle {
        self.shared.log.record(format!("screencap:{}", self.address));
        Box::new(MockJob::done(if self.connected.load(Ordering::SeqCst) {
            JobStatus::Succeeded
        } else {
            JobStatus::Failed
        }))
    }

    fn cached_image(&self) -> Option<ImageBuffer> {
        self.connected.load(Ordering::SeqCst).then(|| ImageBuffer {
            width: 1280,
            height: 720,
            data: Vec::new(),
        })
    }
}

struct MockTasker {
    shared: Arc<Shared>,
    controller: Arc<MockController>,
    disposed: AtomicBool,
}

impl Tasker for MockTasker {
    fn is_initialized(&self) -> bool {
        !self.disposed.load(Ordering::SeqCst) && self.controller.connected.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        false
    }

    fn controller(&self) -> Arc<dyn Controller> {
        self.controller.clone()
    }

    fn append_task(&self, entry: &str, _pipeline_override: &str) -> JobHandle {
        self.shared
            .log
            .record(format!("append_task:{}:{}", self.controller.address, entry));
        let failing = lock(&self.shared.failing_entries).contains(entry);
        Box::new(MockJob {
            id: 1,
            outcome: if failing {
                JobStatus::Failed
            } else {
                JobStatus::Succeeded
            },
            delay: *lock(&self.shared.job_delay),
            shared: Some(Arc::clone(&self.shared)),
        })
    }

    fn stop(&self) -> JobHandle {
        self.shared
            .log
            .record(format!("tasker_stop:{}", self.controller.address));
        let pending = self
            .shared
            .stop_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Box::new(MockJob {
            id: 2,
            outcome: if pending {
                JobStatus::Running
            } else {
                JobStatus::Succeeded
            },
            delay: *lock(&self.shared.stop_delay),
            shared: None,
        })
    }

    fn set_callback(&self, callback: CallbackFn) {
        self.shared
            .log
            .record(format!("set_callback:{}", self.controller.address));
        lock(&self.shared.callbacks).push(callback);
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.shared
            .log
            .record(format!("dispose:{}", self.controller.address));
    }
}

struct MockAgentClient {
    shared: Arc<Shared>,
    identifier: String,
}

impl AgentClient for MockAgentClient {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn link_start(
        &self,
        spawn: &mut dyn FnMut(&str) -> Result<(), EngineError>,
        _cancel: &CancellationToken,
    ) -> Result<bool, EngineError> {
        self.shared.log.record("link_start");
        spawn(&self.identifier)?;
        let delay = *lock(&self.shared.link_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let bridge = self
            .shared
            .bridge_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if bridge {
            return Err(EngineError::Bridge("SEHException".into()));
        }
        if self.shared.agent_fatal.load(Ordering::SeqCst) {
            return Err(EngineError::Agent("agent exited during handshake".into()));
        }
        Ok(true)
    }

    fn link_stop(&self) {
        self.shared.log.record("link_stop");
    }
}

/// 不启动真实进程的 Agent 启动器
#[derive(Clone, Debug, Default)]
pub struct MockLauncher {
    log: CallLog,
}

impl MockLauncher {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl AgentLauncher for MockLauncher {
    fn spawn(&self, exec: &str, _args: &[String], _link_id: &str) -> Result<Box<dyn AgentProcess>, EngineError> {
        self.log.record(format!("agent_spawn:{}", exec));
        Ok(Box::new(MockProcess {
            log: self.log.clone(),
            exited: false,
        }))
    }
}

struct MockProcess {
    log: CallLog,
    exited: bool,
}

impl AgentProcess for MockProcess {
    fn id(&self) -> Option<u32> {
        Some(4242)
    }

    fn has_exited(&mut self) -> bool {
        self.exited
    }

    fn kill(&mut self) {
        self.log.record("process_kill");
        self.exited = true;
    }
}

/// 记录重连阶梯调用；可在指定步骤触发取消
#[derive(Debug, Default)]
pub struct MockMaintenance {
    log: CallLog,
    cancel_at: Mutex<Option<(LadderStep, CancellationToken)>>,
}

impl MockMaintenance {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            cancel_at: Mutex::new(None),
        }
    }

    pub fn cancel_during(&self, step: LadderStep, token: CancellationToken) {
        *lock(&self.cancel_at) = Some((step, token));
    }
}

#[async_trait]
impl DeviceMaintenance for MockMaintenance {
    async fn run_step(
        &self,
        step: LadderStep,
        _target: &DeviceTarget,
        _cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        self.log.record(format!("ladder:{}", step.label()));
        if let Some((at, token)) = lock(&self.cancel_at).as_ref() {
            if *at == step {
                token.cancel();
            }
        }
        Ok(())
    }
}
