//! 声明式重试策略
//!
//! 错误类别 → {最大尝试次数, 退避方式, 不可重试判定}，由同一个 `retry_with_policy` 执行。
//! 表中没有的类别一律不重试；取消永远不重试。

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::{ErrorClass, OrchestratorError};

/// 退避方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    /// 第 n 次失败后等待 base * n
    Linear(Duration),
    Exponential(Duration),
}

impl Backoff {
    /// 第 `attempt` 次（从 1 开始）失败后的等待时间
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(d) => d,
            Self::Linear(base) => base.saturating_mul(attempt.max(1)),
            Self::Exponential(base) => base.saturating_mul(1u32 << attempt.saturating_sub(1).min(16)),
        }
    }
}

/// 单个错误类别的策略
#[derive(Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// 返回 true 时即使类别匹配也不重试
    pub non_retryable: fn(&OrchestratorError) -> bool,
}

fn never(_: &OrchestratorError) -> bool {
    false
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            non_retryable: never,
        }
    }

    pub fn with_non_retryable(mut self, predicate: fn(&OrchestratorError) -> bool) -> Self {
        self.non_retryable = predicate;
        self
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// 策略表
#[derive(Clone, Debug, Default)]
pub struct RetryTable {
    policies: HashMap<ErrorClass, RetryPolicy>,
}

impl RetryTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, class: ErrorClass, policy: RetryPolicy) -> Self {
        self.policies.insert(class, policy);
        self
    }

    pub fn policy(&self, class: ErrorClass) -> Option<&RetryPolicy> {
        if class == ErrorClass::Cancellation {
            return None;
        }
        self.policies.get(&class)
    }

    /// 判断第 `attempt` 次失败后是否还应继续
    pub fn should_retry(&self, err: &OrchestratorError, attempt: u32) -> Option<Duration> {
        let policy = self.policy(err.class())?;
        if (policy.non_retryable)(err) || attempt >= policy.max_attempts {
            return None;
        }
        Some(policy.backoff.delay(attempt))
    }
}

/// Agent 桥接异常最多 3 次、线性 1s 退避；Stop 中止最多 10 次、每次间隔 500ms
pub fn default_retry_table() -> RetryTable {
    RetryTable::empty()
        .with(
            ErrorClass::Bridge,
            RetryPolicy::new(3, Backoff::Linear(Duration::from_millis(1000))),
        )
        .with(
            ErrorClass::AbortPending,
            RetryPolicy::new(10, Backoff::Fixed(Duration::from_millis(500))),
        )
}

/// 通用重试执行器：`op` 收到从 1 开始的尝试序号
pub async fn retry_with_policy<T, F, Fut>(
    table: &RetryTable,
    cancel: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T, OrchestratorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled);
        }

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let Some(delay) = table.should_retry(&err, attempt) else {
            if attempt > 1 {
                tracing::warn!("{} gave up after {} attempts: {}", label, attempt, err);
            }
            return Err(err);
        };

        tracing::warn!(
            "{} failed (attempt {}): {}; retrying in {}ms",
            label,
            attempt,
            err,
            delay.as_millis()
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(OrchestratorError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_table() -> RetryTable {
        RetryTable::empty()
            .with(ErrorClass::Bridge, RetryPolicy::new(3, Backoff::Fixed(Duration::from_millis(1))))
    }

    #[test]
    fn test_backoff_delays() {
        let base = Duration::from_millis(100);
        assert_eq!(Backoff::Fixed(base).delay(4), base);
        assert_eq!(Backoff::Linear(base).delay(3), Duration::from_millis(300));
        assert_eq!(Backoff::Exponential(base).delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_default_table() {
        let table = default_retry_table();
        assert_eq!(table.policy(ErrorClass::Bridge).map(|p| p.max_attempts), Some(3));
        assert_eq!(table.policy(ErrorClass::AbortPending).map(|p| p.max_attempts), Some(10));
        assert!(table.policy(ErrorClass::Agent).is_none());
        assert!(table.policy(ErrorClass::Cancellation).is_none());
    }

    #[tokio::test]
    async fn test_retries_bridge_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_with_policy(&fast_table(), &CancellationToken::new(), "link", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(OrchestratorError::Bridge("SEH".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_policy(&fast_table(), &CancellationToken::new(), "link", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OrchestratorError::Bridge("SEH".into())) }
            })
            .await;
        assert!(matches!(result, Err(OrchestratorError::Bridge(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unlisted_class_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> =
            retry_with_policy(&fast_table(), &CancellationToken::new(), "link", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OrchestratorError::AgentFailed("exec missing".into())) }
            })
            .await;
        assert!(matches!(result, Err(OrchestratorError::AgentFailed(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_predicate() {
        let table = RetryTable::empty().with(
            ErrorClass::Bridge,
            RetryPolicy::new(5, Backoff::Fixed(Duration::from_millis(1)))
                .with_non_retryable(|e| matches!(e, OrchestratorError::Bridge(m) if m == "fatal")),
        );
        let calls = AtomicU32::new(0);
        let _: Result<(), _> = retry_with_policy(&table, &CancellationToken::new(), "link", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(OrchestratorError::Bridge("fatal".into())) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), _> =
            retry_with_policy(&fast_table(), &token, "link", |_| async { Ok(()) }).await;
        assert_eq!(result, Err(OrchestratorError::Cancelled));
    }
}
