//! # Scheduler Errors
//!
//! The scheduler has almost no recoverable failures: backends report
//! these to the kernel, which turns them into a panic. They exist so the
//! panic message says exactly what went wrong.

use crate::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedError {
    /// Every execution context is in use.
    #[error("no free execution context ({} tasks live)", crate::config::MAX_TASKS)]
    PoolExhausted,

    /// The registry has no room for another entry.
    #[error("task registry is full")]
    RegistryFull,

    /// The pid does not denote a live task.
    #[error("task {0} is not live")]
    StaleTask(TaskId),

    /// Only a running task may suspend or terminate itself; the code
    /// that calls `init` is not a task.
    #[error("no task context: only a running task may sleep or exit")]
    NoTaskContext,

    #[error("scheduler used before init()")]
    NotInitialized,

    #[error("scheduler init() called twice")]
    AlreadyInitialized,

    #[error("rate multiplier {0} out of range 1..={max}", max = crate::config::BASE_MICROSECONDS)]
    InvalidRateMultiplier(u32),
}
