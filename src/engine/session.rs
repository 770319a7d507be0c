//! EngineSession：一个 Resource + 一个 Controller + 一个 Tasker
//!
//! 只能被一个所有者（会话管理器或某个 Worker）持有；`release` 消耗自身，保证只释放一次。

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::engine::events::{callback_sink, EngineEvent};
use crate::engine::{Controller, DeviceTarget, Engine, EngineError, Resource, Tasker};

pub struct EngineSession {
    resource: Arc<dyn Resource>,
    controller: Arc<dyn Controller>,
    tasker: Arc<dyn Tasker>,
    address: String,
    subscribed: AtomicBool,
}

impl EngineSession {
    pub fn new(
        resource: Arc<dyn Resource>,
        controller: Arc<dyn Controller>,
        tasker: Arc<dyn Tasker>,
        address: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            controller,
            tasker,
            address: address.into(),
            subscribed: AtomicBool::new(false),
        }
    }

    /// 同步构建完整会话（阻塞调用，需在阻塞线程上执行）
    pub fn build(engine: &dyn Engine, paths: &[PathBuf], target: &DeviceTarget) -> Result<Self, EngineError> {
        let resource = engine.load_resource(paths)?;
        let controller = engine.create_controller(target)?;
        let tasker = engine.create_tasker(Arc::clone(&resource), Arc::clone(&controller))?;
        Ok(Self::new(resource, controller, tasker, target.address.clone()))
    }

    pub fn resource(&self) -> &Arc<dyn Resource> {
        &self.resource
    }

    pub fn controller(&self) -> &Arc<dyn Controller> {
        &self.controller
    }

    pub fn tasker(&self) -> &Arc<dyn Tasker> {
        &self.tasker
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// 安装回调；同一会话只生效一次，返回是否本次安装
    pub fn subscribe(&self, tx: mpsc::UnboundedSender<EngineEvent>) -> bool {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.tasker.set_callback(callback_sink(tx));
        true
    }

    /// 停止正在运行的任务并释放句柄（阻塞）
    pub fn release(self) {
        if self.tasker.is_running() {
            let status = self.tasker.stop().wait();
            tracing::debug!(address = %self.address, "tasker stop before release: {:?}", status);
        }
        self.tasker.dispose();
        tracing::info!(address = %self.address, "Engine session released");
    }

    /// 强制释放：下发 Stop 但不等待
    pub fn force_release(self) {
        if self.tasker.is_running() {
            let _ = self.tasker.stop();
        }
        self.tasker.dispose();
        tracing::warn!(address = %self.address, "Engine session force-released");
    }
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("address", &self.address)
            .field("subscribed", &self.subscribed.load(Ordering::Relaxed))
            .finish()
    }
}
