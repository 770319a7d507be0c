//! MFA Pilot - 自动化任务编排层
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）与运行期键值存储
//! - **interface**: 声明式界面描述（任务、选项、资源、控制器、Agent）
//! - **option**: 选项解析，生成 pipeline override 参数文档
//! - **engine**: 原生引擎边界（Resource / Controller / Tasker / Job / Agent）与 Mock 实现
//! - **core**: 会话生命周期、重连阶梯、任务队列、主控、错误与重试策略、优雅关闭
//! - **multi**: 多开账号、Worker、串行构建/并行执行调度
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod engine;
pub mod interface;
pub mod multi;
pub mod observability;
pub mod option;

pub use crate::core::{Processor, SessionManager};
pub use crate::multi::MultiInstanceRunner;
