//! 核心编排层：错误与恢复、会话生命周期、任务队列、主控、关闭

pub mod agent;
pub mod error;
pub mod lifecycle;
pub mod maintenance;
pub mod notify;
pub mod processor;
pub mod queue;
pub mod recovery;
pub mod scripts;
pub mod session_supervisor;
pub mod shutdown;
pub mod state;

pub use error::{ErrorClass, OrchestratorError};
pub use lifecycle::{ConnectOutcome, SessionManager, SessionSettings};
pub use notify::{Notifier, OnceNotifier, Severity};
pub use processor::{Processor, ProcessorSettings, StopOutcome};
pub use queue::{QueueItem, QueueItemKind, TaskQueue};
pub use recovery::{default_retry_table, retry_with_policy, Backoff, RetryPolicy, RetryTable};
pub use session_supervisor::SessionSupervisor;
pub use state::{ProbeTier, RunStatus, SessionPhase};
