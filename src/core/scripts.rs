//! 前置/后置脚本与更新检查
//!
//! 作为维护项进入队列；脚本内容由配置给出，未配置时直接成功。

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::core::OrchestratorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptPhase {
    Pre,
    Post,
}

#[async_trait]
pub trait ScriptRunner: Send + Sync {
    async fn run(&self, phase: ScriptPhase, cancel: &CancellationToken) -> Result<(), OrchestratorError>;
}

#[async_trait]
pub trait UpdateChecker: Send + Sync {
    async fn check(&self, cancel: &CancellationToken) -> Result<(), OrchestratorError>;
}

/// 通过系统 shell 执行配置的命令行
#[derive(Debug, Clone, Default)]
pub struct CommandScriptRunner {
    pre: Option<String>,
    post: Option<String>,
}

impl CommandScriptRunner {
    pub fn new(pre: Option<String>, post: Option<String>) -> Self {
        Self { pre, post }
    }

    fn shell(command: &str) -> Command {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };
        cmd.arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ScriptRunner for CommandScriptRunner {
    async fn run(&self, phase: ScriptPhase, cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        let script = match phase {
            ScriptPhase::Pre => self.pre.as_deref(),
            ScriptPhase::Post => self.post.as_deref(),
        };
        let Some(script) = script.filter(|s| !s.trim().is_empty()) else {
            return Ok(());
        };

        tracing::info!("Running {:?} script: {}", phase, script);
        let mut cmd = Self::shell(script);
        tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            status = cmd.status() => match status {
                Ok(s) if s.success() => Ok(()),
                Ok(s) => Err(OrchestratorError::Script(format!("{:?} script exited with {}", phase, s))),
                Err(e) => Err(OrchestratorError::Script(format!("{:?} script: {}", phase, e))),
            },
        }
    }
}

/// 未配置更新源
#[derive(Debug, Default)]
pub struct NoopUpdateChecker;

#[async_trait]
impl UpdateChecker for NoopUpdateChecker {
    async fn check(&self, _cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        tracing::info!("No update source configured; skipping update check");
        Ok(())
    }
}
