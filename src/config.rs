//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MFA__*` 覆盖（双下划线表示嵌套，如 `MFA__MULTI__MAX_CONCURRENCY=4`）。
//! 运行期可变的开关（重连阶梯、并发上限、已选设备）放在 `SettingsStore` 中，由配置初始化。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{ControllerKind, DeviceTarget};
use crate::multi::AccountConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub device: DeviceSection,
    pub connect: ConnectSection,
    pub scripts: ScriptsSection,
    pub performance: PerformanceSection,
    pub multi: MultiSection,
}

/// [app] 段：界面描述文件、所选资源与控制器
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    #[serde(default = "default_interface_path")]
    pub interface_path: PathBuf,
    /// 所选资源名，未设置时取界面描述中的第一个
    pub resource: Option<String>,
    /// 所选控制器名，未设置时取第一个
    pub controller: Option<String>,
    /// 单个任务失败时是否继续后续任务
    pub continue_on_job_error: bool,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            interface_path: default_interface_path(),
            resource: None,
            controller: None,
            continue_on_job_error: false,
        }
    }
}

fn default_interface_path() -> PathBuf {
    PathBuf::from("interface.json")
}

/// [device] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub adb_path: Option<PathBuf>,
    #[serde(default = "default_serial")]
    pub serial: String,
    /// 透传给控制器的 JSON 配置
    pub config: Option<String>,
    pub window_class: Option<String>,
    pub window_name: Option<String>,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            adb_path: None,
            serial: default_serial(),
            config: None,
            window_class: None,
            window_name: None,
        }
    }
}

fn default_serial() -> String {
    "127.0.0.1:16384".to_string()
}

impl DeviceSection {
    pub fn controller_config(&self) -> Value {
        self.config
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    /// 根据控制器类型生成连接目标
    pub fn target(&self, kind: ControllerKind) -> DeviceTarget {
        match kind {
            ControllerKind::Adb => DeviceTarget::adb(self.serial.clone())
                .with_adb_path(self.adb_path.clone())
                .with_config(self.controller_config()),
            ControllerKind::Win32 => DeviceTarget {
                kind,
                name: self.window_name.clone().unwrap_or_default(),
                address: self.window_class.clone().unwrap_or_default(),
                adb_path: None,
                config: self.controller_config(),
            },
        }
    }
}

/// [connect] 段：重连阶梯开关与模拟器启动
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectSection {
    pub retry_on_disconnected: bool,
    pub soft_reconnect: bool,
    pub allow_adb_restart: bool,
    pub allow_adb_hard_restart: bool,
    pub launcher_path: Option<PathBuf>,
    pub launcher_args: Vec<String>,
    pub launcher_wait_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for ConnectSection {
    fn default() -> Self {
        Self {
            retry_on_disconnected: false,
            soft_reconnect: true,
            allow_adb_restart: true,
            allow_adb_hard_restart: true,
            launcher_path: None,
            launcher_args: Vec::new(),
            launcher_wait_secs: 10,
            connect_timeout_secs: 30,
        }
    }
}

/// [scripts] 段：任务前后执行的命令行
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ScriptsSection {
    pub pre: Option<String>,
    pub post: Option<String>,
}

/// [performance] 段：截图耗时探测
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PerformanceSection {
    pub samples: u32,
    pub warn_ms: u64,
    pub error_ms: u64,
}

impl Default for PerformanceSection {
    fn default() -> Self {
        Self {
            samples: 4,
            warn_ms: 400,
            error_ms: 800,
        }
    }
}

/// [multi] 段：多开调度
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MultiSection {
    pub max_concurrency: usize,
    pub init_timeout_secs: u64,
    pub screencap_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// 仅队长执行的任务名
    pub leader_only_tasks: Vec<String>,
    /// 仅队长执行的任务名前缀
    pub leader_only_prefixes: Vec<String>,
    pub accounts: Vec<AccountConfig>,
}

impl Default for MultiSection {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            init_timeout_secs: 30,
            screencap_timeout_secs: 30,
            poll_interval_ms: 100,
            leader_only_tasks: Vec::new(),
            leader_only_prefixes: Vec::new(),
            accounts: Vec::new(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 MFA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MFA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MFA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 运行期键名
pub mod keys {
    pub const RETRY_ON_DISCONNECTED: &str = "connect.retry_on_disconnected";
    pub const SOFT_RECONNECT: &str = "connect.soft_reconnect";
    pub const ALLOW_ADB_RESTART: &str = "connect.allow_adb_restart";
    pub const ALLOW_ADB_HARD_RESTART: &str = "connect.allow_adb_hard_restart";
    pub const MAX_CONCURRENCY: &str = "multi.max_concurrency";
    pub const DEVICE_SERIAL: &str = "device.serial";
}

/// 运行期键值读写接口（持久化格式由外部决定）
pub trait SettingsStore: Send + Sync {
    fn get_value(&self, key: &str) -> Option<Value>;
    fn set_value(&self, key: &str, value: Value);

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_value(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get_value(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.get_value(key).and_then(|v| v.as_str().map(str::to_string))
    }
}

/// 类型化读写（对任意 SettingsStore 可用，包括 trait object）
pub trait SettingsExt {
    fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T;
    fn set<T: Serialize>(&self, key: &str, value: T);
}

impl<S: SettingsStore + ?Sized> SettingsExt for S {
    /// 缺失或类型不符时返回 default
    fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_value(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(default)
    }

    fn set<T: Serialize>(&self, key: &str, value: T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set_value(key, v),
            Err(e) => tracing::warn!("Cannot store setting '{}': {}", key, e),
        }
    }
}

/// 内存实现
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, Value>>,
}

impl MemorySettings {
    /// 用配置文件中的开关初始化
    pub fn from_config(cfg: &AppConfig) -> Self {
        let store = Self::default();
        store.set(keys::RETRY_ON_DISCONNECTED, cfg.connect.retry_on_disconnected);
        store.set(keys::SOFT_RECONNECT, cfg.connect.soft_reconnect);
        store.set(keys::ALLOW_ADB_RESTART, cfg.connect.allow_adb_restart);
        store.set(keys::ALLOW_ADB_HARD_RESTART, cfg.connect.allow_adb_hard_restart);
        store.set(keys::MAX_CONCURRENCY, cfg.multi.max_concurrency);
        store.set(keys::DEVICE_SERIAL, cfg.device.serial.clone());
        store
    }
}

impl SettingsStore for MemorySettings {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_value(&self, key: &str, value: Value) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }
}
