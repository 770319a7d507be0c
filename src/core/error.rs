//! 编排层错误与错误分类
//!
//! Engine 的底层异常在每个操作边界被捕获，转换为 OrchestratorError，
//! 再由 ErrorClass 决定重试策略（见 recovery）与最终状态。

use thiserror::Error;

use crate::engine::{EngineError, JobStatus};

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("Config error: {0}")]
    Config(String),

    /// 资源路径加载失败，不自动重试
    #[error("Resource invalid: {0}")]
    ResourceInvalid(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// 原生桥接瞬时异常（Agent 链接时出现）
    #[error("Native bridge error: {0}")]
    Bridge(String),

    #[error("Agent start failed: {0}")]
    AgentFailed(String),

    #[error("Job failed: {entry} ({status:?})")]
    JobFailed { entry: String, status: JobStatus },

    #[error("Script failed: {0}")]
    Script(String),

    /// Stop 时中止任务尚未成功
    #[error("Abort pending: {0:?}")]
    AbortPending(JobStatus),

    #[error("Cancelled")]
    Cancelled,
}

/// 错误类别：决定是否重试以及最终状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Configuration,
    TransientConnectivity,
    Bridge,
    Agent,
    JobFailure,
    AbortPending,
    Cancellation,
}

impl OrchestratorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Config(_) | Self::ResourceInvalid(_) => ErrorClass::Configuration,
            Self::ConnectionFailed(_) => ErrorClass::TransientConnectivity,
            Self::Bridge(_) => ErrorClass::Bridge,
            Self::AgentFailed(_) => ErrorClass::Agent,
            Self::JobFailed { .. } | Self::Script(_) => ErrorClass::JobFailure,
            Self::AbortPending(_) => ErrorClass::AbortPending,
            Self::Cancelled => ErrorClass::Cancellation,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<EngineError> for OrchestratorError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ResourceLoad(msg) => Self::ResourceInvalid(msg),
            EngineError::Controller(msg) | EngineError::Tasker(msg) => Self::ConnectionFailed(msg),
            EngineError::Bridge(msg) => Self::Bridge(msg),
            EngineError::Agent(msg) | EngineError::Spawn(msg) => Self::AgentFailed(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_errors_are_classified() {
        let cases = [
            (EngineError::ResourceLoad("x".into()), ErrorClass::Configuration),
            (EngineError::Controller("x".into()), ErrorClass::TransientConnectivity),
            (EngineError::Bridge("x".into()), ErrorClass::Bridge),
            (EngineError::Spawn("x".into()), ErrorClass::Agent),
        ];
        for (err, class) in cases {
            assert_eq!(OrchestratorError::from(err).class(), class);
        }
    }

    #[test]
    fn test_cancellation_is_its_own_class() {
        assert!(OrchestratorError::Cancelled.is_cancellation());
        assert_eq!(OrchestratorError::Cancelled.class(), ErrorClass::Cancellation);
    }
}
