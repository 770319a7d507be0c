//! 多开账号：身份、状态、进度
//!
//! 状态与进度只由持有该账号的 Worker 写入，UI 无锁读取（最终一致）。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 配置文件中的账号（`[[multi.accounts]]`）
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AccountConfig {
    pub name: String,
    #[serde(default)]
    pub serial: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub leader: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AccountStatus {
    Idle = 0,
    Waiting = 1,
    Running = 2,
    Completed = 3,
    Failed = 4,
    Cancelled = 5,
}

impl AccountStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Waiting,
            2 => Self::Running,
            3 => Self::Completed,
            4 => Self::Failed,
            5 => Self::Cancelled,
            _ => Self::Idle,
        }
    }
}

/// 对外展示的快照
#[derive(Debug, Clone, Serialize)]
pub struct AccountSnapshot {
    pub id: String,
    pub display_name: String,
    pub status: AccountStatus,
    pub progress: u8,
    pub current_task: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug)]
pub struct Account {
    id: String,
    pub name: String,
    pub serial: String,
    pub enabled: bool,
    pub leader: bool,
    status: AtomicU8,
    progress: AtomicU8,
    current_task: Mutex<Option<String>>,
    started_at: Mutex<Option<DateTime<Utc>>>,
    ended_at: Mutex<Option<DateTime<Utc>>>,
    error: Mutex<Option<String>>,
}

impl Account {
    pub fn new(name: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            serial: serial.into(),
            enabled: true,
            leader: false,
            status: AtomicU8::new(AccountStatus::Idle as u8),
            progress: AtomicU8::new(0),
            current_task: Mutex::new(None),
            started_at: Mutex::new(None),
            ended_at: Mutex::new(None),
            error: Mutex::new(None),
        }
    }

    pub fn from_config(cfg: &AccountConfig) -> Self {
        let mut account = Self::new(cfg.name.clone(), cfg.serial.clone());
        account.enabled = cfg.enabled;
        account.leader = cfg.leader;
        account
    }

    pub fn as_leader(mut self) -> Self {
        self.leader = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `name:port`，port 取序列号最后一个 ':' 之后的部分
    pub fn display_name(&self) -> String {
        match self.serial.rsplit_once(':') {
            Some((_, port)) if !port.is_empty() => format!("{}:{}", self.name, port),
            _ => self.name.clone(),
        }
    }

    pub fn status(&self) -> AccountStatus {
        AccountStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn set_status(&self, status: AccountStatus) {
        self.status.store(status as u8, Ordering::Release);
        match status {
            AccountStatus::Running => {
                let mut started = lock(&self.started_at);
                if started.is_none() {
                    *started = Some(Utc::now());
                }
            }
            AccountStatus::Completed | AccountStatus::Failed | AccountStatus::Cancelled => {
                *lock(&self.ended_at) = Some(Utc::now());
            }
            AccountStatus::Idle | AccountStatus::Waiting => {}
        }
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Acquire)
    }

    /// done * 100 / total
    pub fn set_progress(&self, done: usize, total: usize) {
        let pct = if total == 0 { 100 } else { (done.min(total) * 100 / total) as u8 };
        self.progress.store(pct, Ordering::Release);
    }

    pub fn current_task(&self) -> Option<String> {
        lock(&self.current_task).clone()
    }

    pub fn set_current_task(&self, task: Option<String>) {
        *lock(&self.current_task) = task;
    }

    pub fn error(&self) -> Option<String> {
        lock(&self.error).clone()
    }

    pub fn set_error(&self, message: impl Into<String>) {
        *lock(&self.error) = Some(message.into());
    }

    /// 回到 Idle，清空进度、当前任务、时间戳与错误
    pub fn reset(&self) {
        self.status.store(AccountStatus::Idle as u8, Ordering::Release);
        self.progress.store(0, Ordering::Release);
        *lock(&self.current_task) = None;
        *lock(&self.started_at) = None;
        *lock(&self.ended_at) = None;
        *lock(&self.error) = None;
    }

    /// 复制为新账号：新 id，非队长
    pub fn duplicate(&self) -> Self {
        let mut copy = Self::new(self.name.clone(), self.serial.clone());
        copy.enabled = self.enabled;
        copy
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.id.clone(),
            display_name: self.display_name(),
            status: self.status(),
            progress: self.progress(),
            current_task: self.current_task(),
            started_at: *lock(&self.started_at),
            ended_at: *lock(&self.ended_at),
            error: self.error(),
        }
    }
}
