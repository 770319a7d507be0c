//! Agent 子进程启动
//!
//! Engine 在 `link_start` 中回调启动器；启动器负责拉起子进程并把链接标识作为最后一个参数传入。

use std::process::{Child, Command, Stdio};

use crate::engine::{AgentProcess, EngineError};

pub trait AgentLauncher: Send + Sync {
    fn spawn(&self, exec: &str, args: &[String], link_id: &str) -> Result<Box<dyn AgentProcess>, EngineError>;
}

/// 用 std::process 启动真实子进程
#[derive(Debug, Default)]
pub struct CommandLauncher;

impl AgentLauncher for CommandLauncher {
    fn spawn(&self, exec: &str, args: &[String], link_id: &str) -> Result<Box<dyn AgentProcess>, EngineError> {
        let child = Command::new(exec)
            .args(args)
            .arg(link_id)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", exec, e)))?;
        tracing::info!(pid = child.id(), "Agent process started: {}", exec);
        Ok(Box::new(ChildProcess(child)))
    }
}

struct ChildProcess(Child);

impl AgentProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        Some(self.0.id())
    }

    fn has_exited(&mut self) -> bool {
        matches!(self.0.try_wait(), Ok(Some(_)))
    }

    fn kill(&mut self) {
        if let Err(e) = self.0.kill() {
            tracing::warn!("Failed to kill agent process {}: {}", self.0.id(), e);
        }
        let _ = self.0.wait();
    }
}

/// 未配置标识时生成 8 位随机字母数字
pub fn random_identifier() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_identifier_shape() {
        let id = random_identifier();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, random_identifier());
    }

    #[test]
    fn test_missing_executable_is_spawn_error() {
        let result = CommandLauncher.spawn("/nonexistent/agent-binary", &[], "abc");
        assert!(matches!(result, Err(EngineError::Spawn(_))));
    }
}
