//! Engine 边界：原生句柄接口、Job 等待、回调事件、会话与 Mock 实现

pub mod events;
pub mod focus;
pub mod job;
pub mod mock;
pub mod session;
pub mod traits;

pub use events::{callback_sink, pump_events, EngineEvent, EventPhase};
pub use job::{execute_entry, poll_job, wait_job, Job, JobHandle, JobStatus, PollOutcome};
pub use session::EngineSession;
pub use traits::{
    AgentClient, AgentProcess, CallbackFn, Controller, ControllerKind, DeviceInfo, DeviceTarget,
    Engine, EngineError, ImageBuffer, Resource, Tasker,
};
