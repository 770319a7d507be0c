//! 会话监管：每次「开始任务」一个取消令牌
//!
//! 同一个令牌贯穿队列执行、连接重试与 Job 等待；Stop 时触发取消。

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Run {
    token: CancellationToken,
    started_at: Instant,
    finished: bool,
}

/// 运行期生命周期：令牌与计时
#[derive(Debug)]
pub struct SessionSupervisor {
    current: Mutex<Run>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Run {
                token: CancellationToken::new(),
                started_at: Instant::now(),
                finished: true,
            }),
        }
    }

    /// 开始新一轮运行，返回它的令牌
    pub fn begin(&self) -> CancellationToken {
        let mut run = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        *run = Run {
            token: CancellationToken::new(),
            started_at: Instant::now(),
            finished: false,
        };
        run.token.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone()
    }

    /// 触发取消
    pub fn cancel(&self) {
        self.cancel_token().cancel();
    }

    /// 有运行中的任务且尚未取消
    pub fn is_running(&self) -> bool {
        let run = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        !run.finished && !run.token.is_cancelled()
    }

    /// 本轮是否已收尾（含从未开始）
    pub fn is_finished(&self) -> bool {
        self.current.lock().unwrap_or_else(PoisonError::into_inner).finished
    }

    pub fn finish(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finished = true;
    }

    pub fn elapsed(&self) -> Duration {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .started_at
            .elapsed()
    }

    /// 子令牌（用于单个 Worker 或单项）
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token().child_token()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// HH:MM:SS
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
