//! 连接重试阶梯：启动模拟器 → 软重连 → 重启 adb → 强制重启 adb
//!
//! 每一步的开关从 SettingsStore 读取；顺序固定。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{keys, SettingsStore};
use crate::core::OrchestratorError;
use crate::engine::DeviceTarget;

/// 阶梯步骤
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LadderStep {
    StartLauncher,
    SoftReconnect,
    RestartDaemon,
    HardRestartDaemon,
}

impl LadderStep {
    pub const ORDER: [LadderStep; 4] = [
        Self::StartLauncher,
        Self::SoftReconnect,
        Self::RestartDaemon,
        Self::HardRestartDaemon,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::StartLauncher => "start_launcher",
            Self::SoftReconnect => "soft_reconnect",
            Self::RestartDaemon => "restart_daemon",
            Self::HardRestartDaemon => "hard_restart_daemon",
        }
    }

    fn setting(self) -> (&'static str, bool) {
        match self {
            Self::StartLauncher => (keys::RETRY_ON_DISCONNECTED, false),
            Self::SoftReconnect => (keys::SOFT_RECONNECT, true),
            Self::RestartDaemon => (keys::ALLOW_ADB_RESTART, true),
            Self::HardRestartDaemon => (keys::ALLOW_ADB_HARD_RESTART, true),
        }
    }

    pub fn enabled(self, store: &dyn SettingsStore) -> bool {
        let (key, default) = self.setting();
        store.get_bool(key, default)
    }

    /// 当前配置下启用的步骤，按声明顺序
    pub fn enabled_steps(store: &dyn SettingsStore) -> Vec<LadderStep> {
        Self::ORDER.into_iter().filter(|s| s.enabled(store)).collect()
    }
}

#[async_trait]
pub trait DeviceMaintenance: Send + Sync {
    async fn run_step(
        &self,
        step: LadderStep,
        target: &DeviceTarget,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError>;
}

/// 通过 adb 命令行与模拟器启动程序执行阶梯
#[derive(Debug, Clone)]
pub struct AdbMaintenance {
    adb_path: PathBuf,
    launcher: Option<PathBuf>,
    launcher_args: Vec<String>,
    launcher_wait: Duration,
}

impl AdbMaintenance {
    pub fn new(adb_path: Option<PathBuf>) -> Self {
        Self {
            adb_path: adb_path.unwrap_or_else(|| PathBuf::from("adb")),
            launcher: None,
            launcher_args: Vec::new(),
            launcher_wait: Duration::from_secs(10),
        }
    }

    pub fn with_launcher(mut self, path: Option<PathBuf>, args: Vec<String>, wait: Duration) -> Self {
        self.launcher = path;
        self.launcher_args = args;
        self.launcher_wait = wait;
        self
    }

    fn adb_for(&self, target: &DeviceTarget) -> PathBuf {
        target.adb_path.clone().unwrap_or_else(|| self.adb_path.clone())
    }

    async fn run(program: &PathBuf, args: &[&str], cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            status = cmd.status() => match status {
                Ok(s) if s.success() => Ok(()),
                Ok(s) => Err(OrchestratorError::ConnectionFailed(format!(
                    "{} {} exited with {}", program.display(), args.join(" "), s
                ))),
                Err(e) => Err(OrchestratorError::ConnectionFailed(format!(
                    "{} {}: {}", program.display(), args.join(" "), e
                ))),
            },
        }
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), OrchestratorError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
            _ = tokio::time::sleep(self.launcher_wait) => Ok(()),
        }
    }
}

#[async_trait]
impl DeviceMaintenance for AdbMaintenance {
    async fn run_step(
        &self,
        step: LadderStep,
        target: &DeviceTarget,
        cancel: &CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let adb = self.adb_for(target);
        let serial = target.address.as_str();
        match step {
            LadderStep::StartLauncher => {
                let Some(launcher) = &self.launcher else {
                    tracing::info!("No launcher configured; skipping launcher start");
                    return Ok(());
                };
                Command::new(launcher)
                    .args(&self.launcher_args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| OrchestratorError::ConnectionFailed(format!("launcher: {}", e)))?;
                self.pause(cancel).await
            }
            LadderStep::SoftReconnect => {
                let _ = Self::run(&adb, &["disconnect", serial], cancel).await;
                Self::run(&adb, &["connect", serial], cancel).await
            }
            LadderStep::RestartDaemon => {
                Self::run(&adb, &["kill-server"], cancel).await?;
                Self::run(&adb, &["start-server"], cancel).await
            }
            LadderStep::HardRestartDaemon => {
                let program = PathBuf::from(if cfg!(windows) { "taskkill" } else { "pkill" });
                let args: &[&str] = if cfg!(windows) {
                    &["/F", "/IM", "adb.exe"]
                } else {
                    &["-9", "-x", "adb"]
                };
                if let Err(e) = Self::run(&program, args, cancel).await {
                    if e.is_cancellation() {
                        return Err(e);
                    }
                    tracing::warn!("Force-killing adb reported: {}", e);
                }
                Self::run(&adb, &["start-server"], cancel).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemorySettings, SettingsExt};

    #[test]
    fn test_default_enabled_steps() {
        let store = MemorySettings::default();
        assert_eq!(
            LadderStep::enabled_steps(&store),
            vec![
                LadderStep::SoftReconnect,
                LadderStep::RestartDaemon,
                LadderStep::HardRestartDaemon
            ]
        );
    }

    #[test]
    fn test_flags_toggle_steps() {
        let store = MemorySettings::default();
        store.set(keys::RETRY_ON_DISCONNECTED, true);
        store.set(keys::ALLOW_ADB_HARD_RESTART, false);
        assert_eq!(
            LadderStep::enabled_steps(&store),
            vec![
                LadderStep::StartLauncher,
                LadderStep::SoftReconnect,
                LadderStep::RestartDaemon
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_launcher_is_noop() {
        let maintenance = AdbMaintenance::new(None);
        let result = maintenance
            .run_step(
                LadderStep::StartLauncher,
                &DeviceTarget::adb("127.0.0.1:5555"),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.is_ok());
    }
}
