//! Engine 回调事件：原生回调 → 类型化事件 → mpsc 通道
//!
//! 会话建立时只订阅一次回调；回调线程只做解码与投递，消费方（UI / 日志）从通道中取。

use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::notify::{Notifier, Severity};
use crate::engine::focus::{render_focus, FocusLine};

/// 事件阶段（取自消息名的最后一段）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventPhase {
    Starting,
    Succeeded,
    Failed,
    Other,
}

impl EventPhase {
    fn from_suffix(message: &str) -> Self {
        match message.rsplit('.').next() {
            Some("Starting") => Self::Starting,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Other,
        }
    }
}

/// 解码后的回调事件
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// Tasker.Task.*
    Task {
        phase: EventPhase,
        task_id: i64,
        entry: String,
    },
    /// Node.*（识别、动作、节点）
    Node {
        message: String,
        phase: EventPhase,
        name: String,
        focus: Option<Value>,
        details: Value,
    },
    Other {
        message: String,
        details: Value,
    },
}

impl EngineEvent {
    /// 解码原生回调；details 不是合法 JSON 时按字符串保留
    pub fn decode(message: &str, details: &str) -> Self {
        let details: Value =
            serde_json::from_str(details).unwrap_or_else(|_| Value::String(details.to_string()));
        let phase = EventPhase::from_suffix(message);

        if message.starts_with("Tasker.Task.") {
            return Self::Task {
                phase,
                task_id: details.get("task_id").and_then(Value::as_i64).unwrap_or_default(),
                entry: str_field(&details, "entry"),
            };
        }

        if message.starts_with("Node.") {
            return Self::Node {
                message: message.to_string(),
                phase,
                name: str_field(&details, "name"),
                focus: details.get("focus").filter(|f| !f.is_null()).cloned(),
                details,
            };
        }

        Self::Other {
            message: message.to_string(),
            details,
        }
    }
}

fn str_field(details: &Value, key: &str) -> String {
    details
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// 包装 sender 成为 Engine 回调
pub fn callback_sink(tx: mpsc::UnboundedSender<EngineEvent>) -> crate::engine::CallbackFn {
    Box::new(move |message: &str, details: &str| {
        if tx.send(EngineEvent::decode(message, details)).is_err() {
            tracing::debug!("Event receiver dropped; discarding '{}'", message);
        }
    })
}

/// 消费事件通道，把 focus 提示转发给日志/通知接口；通道关闭时返回
pub async fn pump_events(mut rx: mpsc::UnboundedReceiver<EngineEvent>, notifier: &dyn Notifier) {
    while let Some(event) = rx.recv().await {
        match &event {
            EngineEvent::Node {
                message,
                phase,
                focus: Some(focus),
                details,
                ..
            } => {
                for line in render_focus(message, *phase, details, focus) {
                    emit(notifier, &line);
                }
            }
            EngineEvent::Task { phase, entry, .. } => {
                tracing::debug!(entry = %entry, "task {:?}", phase);
            }
            _ => tracing::trace!("engine event: {:?}", event),
        }
    }
}

fn emit(notifier: &dyn Notifier, line: &FocusLine) {
    if line.toast {
        notifier.notify(&line.text, "");
    } else {
        let severity = match line.color.as_deref() {
            Some("red") => Severity::Error,
            Some("orange") | Some("yellow") => Severity::Warning,
            Some("green") => Severity::Success,
            _ => Severity::Info,
        };
        notifier.add_log(&line.text, severity);
    }
}
