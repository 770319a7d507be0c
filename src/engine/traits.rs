//! Engine 抽象：Resource / Controller / Tasker / AgentClient
//!
//! 原生引擎以不透明依赖出现；这里只定义编排层消费的接口。
//! 所有方法都是同步的（可能阻塞），调用方负责放到阻塞线程上执行。

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::engine::JobHandle;

/// Engine 边界上的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Resource load failed: {0}")]
    ResourceLoad(String),

    #[error("Controller error: {0}")]
    Controller(String),

    #[error("Tasker error: {0}")]
    Tasker(String),

    /// 原生桥接层抛出的瞬时异常
    #[error("Native bridge error: {0}")]
    Bridge(String),

    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Process spawn failed: {0}")]
    Spawn(String),
}

/// 截图缓存
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ImageBuffer {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// 已加载的识别/动作资源包
pub trait Resource: Send + Sync {
    fn paths(&self) -> &[PathBuf];
}

/// 设备或窗口连接
pub trait Controller: Send + Sync {
    fn connect(&self) -> JobHandle;
    fn screencap(&self) -> JobHandle;
    fn cached_image(&self) -> Option<ImageBuffer>;
}

/// Engine 回调：(message, details_json)
pub type CallbackFn = Box<dyn Fn(&str, &str) + Send + Sync>;

/// 绑定了 Resource 与 Controller 的运行时会话
pub trait Tasker: Send + Sync {
    fn is_initialized(&self) -> bool;
    fn is_running(&self) -> bool;
    fn controller(&self) -> Arc<dyn Controller>;
    fn append_task(&self, entry: &str, pipeline_override: &str) -> JobHandle;
    fn stop(&self) -> JobHandle;
    fn set_callback(&self, callback: CallbackFn);
    fn dispose(&self);
}

/// Agent 子进程句柄
pub trait AgentProcess: Send {
    fn id(&self) -> Option<u32>;
    fn has_exited(&mut self) -> bool;
    fn kill(&mut self);
}

/// Agent 桥接客户端
pub trait AgentClient: Send + Sync {
    fn identifier(&self) -> &str;

    /// 建立链接；`spawn` 由 Engine 在需要时回调以启动子进程（参数为链接标识）
    fn link_start(
        &self,
        spawn: &mut dyn FnMut(&str) -> Result<(), EngineError>,
        cancel: &CancellationToken,
    ) -> Result<bool, EngineError>;

    fn link_stop(&self);
}

/// 控制器类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerKind {
    #[default]
    #[serde(alias = "Adb", alias = "ADB")]
    Adb,
    #[serde(alias = "Win32", alias = "WIN32")]
    Win32,
}

/// 连接目标
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceTarget {
    pub kind: ControllerKind,
    pub name: String,
    /// adb 序列号或窗口标识
    pub address: String,
    pub adb_path: Option<PathBuf>,
    pub config: Value,
}

impl DeviceTarget {
    pub fn adb(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            kind: ControllerKind::Adb,
            name: address.clone(),
            address,
            adb_path: None,
            config: Value::Object(Default::default()),
        }
    }

    pub fn with_adb_path(mut self, path: Option<PathBuf>) -> Self {
        self.adb_path = path;
        self
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn is_adb(&self) -> bool {
        self.kind == ControllerKind::Adb
    }
}

/// `find_devices` 返回的设备描述
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub adb_path: PathBuf,
    pub address: String,
    pub config: Value,
}

impl From<DeviceInfo> for DeviceTarget {
    fn from(info: DeviceInfo) -> Self {
        Self {
            kind: ControllerKind::Adb,
            name: info.name,
            address: info.address,
            adb_path: Some(info.adb_path),
            config: info.config,
        }
    }
}

/// 原生引擎入口：创建句柄
pub trait Engine: Send + Sync {
    fn load_resource(&self, paths: &[PathBuf]) -> Result<Arc<dyn Resource>, EngineError>;

    fn create_controller(&self, target: &DeviceTarget) -> Result<Arc<dyn Controller>, EngineError>;

    fn create_tasker(
        &self,
        resource: Arc<dyn Resource>,
        controller: Arc<dyn Controller>,
    ) -> Result<Arc<dyn Tasker>, EngineError>;

    fn create_agent_client(
        &self,
        identifier: &str,
        tasker: Arc<dyn Tasker>,
    ) -> Result<Arc<dyn AgentClient>, EngineError>;

    /// 枚举已连接的传输层设备
    fn find_devices(&self) -> Vec<DeviceInfo>;
}
