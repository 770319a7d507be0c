//! 状态定义：队列状态、会话阶段、性能分级
//!
//! 这些值由一个所有者线程写入，观察者（UI）通过 watch 通道无锁读取，允许最终一致。

use serde::Serialize;

/// 队列 / 单项执行状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    NotStarted,
    Succeeded,
    Failed,
    Stopped,
    /// Stop 进行中
    Stopping,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Stopped)
    }
}

/// 会话状态机：任一步失败回到 Uninitialized
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Uninitialized,
    ResourceLoading,
    ControllerConnecting,
    Binding,
    Ready,
}

/// 截图耗时分级
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeTier {
    Normal,
    Warning,
    Error,
}

impl ProbeTier {
    pub fn classify(average_ms: u64, warn_ms: u64, error_ms: u64) -> Self {
        if average_ms >= error_ms {
            Self::Error
        } else if average_ms >= warn_ms {
            Self::Warning
        } else {
            Self::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_tiers() {
        assert_eq!(ProbeTier::classify(120, 400, 800), ProbeTier::Normal);
        assert_eq!(ProbeTier::classify(400, 400, 800), ProbeTier::Warning);
        assert_eq!(ProbeTier::classify(950, 400, 800), ProbeTier::Error);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::NotStarted.is_terminal());
        assert!(!RunStatus::Stopping.is_terminal());
    }
}
