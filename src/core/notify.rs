//! 日志/提示输出接口
//!
//! 编排层只调用 `add_log` / `notify`，具体展示由外部实现。
//! `OnceNotifier` 对相同 (title, body) 的通知在进程生命周期内只发一次。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

/// 日志级别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

pub trait Notifier: Send + Sync {
    fn add_log(&self, text: &str, severity: Severity);
    fn notify(&self, title: &str, body: &str);
}

/// 直接写入 tracing
#[derive(Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn add_log(&self, text: &str, severity: Severity) {
        match severity {
            Severity::Error => tracing::error!("{}", text),
            Severity::Warning => tracing::warn!("{}", text),
            Severity::Info | Severity::Success => tracing::info!("{}", text),
        }
    }

    fn notify(&self, title: &str, body: &str) {
        tracing::info!(title = %title, "{}", body);
    }
}

/// 去重包装：同一根因的通知只显示一次
pub struct OnceNotifier {
    inner: Arc<dyn Notifier>,
    shown: Mutex<HashSet<(String, String)>>,
}

impl OnceNotifier {
    pub fn new(inner: Arc<dyn Notifier>) -> Self {
        Self {
            inner,
            shown: Mutex::new(HashSet::new()),
        }
    }

    /// 按自定义键去重（如「配置加载失败」每进程只提示一次）
    pub fn notify_once(&self, key: &str, title: &str, body: &str) -> bool {
        let first = self
            .shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((key.to_string(), String::new()));
        if first {
            self.inner.notify(title, body);
        }
        first
    }
}

impl Notifier for OnceNotifier {
    fn add_log(&self, text: &str, severity: Severity) {
        self.inner.add_log(text, severity);
    }

    fn notify(&self, title: &str, body: &str) {
        let first = self
            .shown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((title.to_string(), body.to_string()));
        if first {
            self.inner.notify(title, body);
        } else {
            tracing::debug!(title = %title, "Suppressed repeated notification");
        }
    }
}

/// 记录所有调用，供测试断言
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    logs: Mutex<Vec<(String, Severity)>>,
    notes: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn logs(&self) -> Vec<(String, Severity)> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn notifications(&self) -> Vec<(String, String)> {
        self.notes.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn add_log(&self, text: &str, severity: Severity) {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((text.to_string(), severity));
    }

    fn notify(&self, title: &str, body: &str) {
        self.notes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), body.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_once_notifier_suppresses_duplicates() {
        let recorder = Arc::new(RecordingNotifier::default());
        let once = OnceNotifier::new(recorder.clone());
        once.notify("Resource load failed", "bad path");
        once.notify("Resource load failed", "bad path");
        once.notify("Resource load failed", "other path");
        assert_eq!(recorder.notifications().len(), 2);
    }

    #[test]
    fn test_notify_once_by_key() {
        let recorder = Arc::new(RecordingNotifier::default());
        let once = OnceNotifier::new(recorder.clone());
        assert!(once.notify_once("config", "Config", "first"));
        assert!(!once.notify_once("config", "Config", "second"));
        assert_eq!(recorder.notifications(), vec![("Config".to_string(), "first".to_string())]);
    }

    #[test]
    fn test_logs_are_not_deduplicated() {
        let recorder = Arc::new(RecordingNotifier::default());
        let once = OnceNotifier::new(recorder.clone());
        once.add_log("same", Severity::Info);
        once.add_log("same", Severity::Info);
        assert_eq!(recorder.logs().len(), 2);
    }
}
