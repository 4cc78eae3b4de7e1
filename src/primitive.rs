//! # Execution Primitive
//!
//! The contract between the scheduler core and the substrate that really
//! runs contexts. Exactly one implementation is linked per target (see
//! [`crate::arch::Backend`]): the Cortex-M4 port driven by SysTick and
//! PendSV, or the host port built on OS threads.
//!
//! The core never asks which one it is talking to.

use core::fmt;
use core::time::Duration;

use crate::config::SchedulerConfig;
use crate::error::SchedError;
use crate::kernel::Scheduler;
use crate::task::{Priority, TaskId};

/// Attributes requested for every new context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnAttributes {
    pub priority: Priority,
    /// Always `false`: tasks are fire-and-forget.
    pub joinable: bool,
    /// Always `true`: any task may be killed.
    pub cancellable: bool,
}

impl SpawnAttributes {
    pub const fn task(priority: Priority) -> Self {
        Self {
            priority,
            joinable: false,
            cancellable: true,
        }
    }
}

/// Body of a task. Receives the scheduler it was created on.
pub type TaskFn<P> = fn(&'static Scheduler<P>);

/// What a new context runs: a task body bound to its scheduler.
pub struct TaskEntry<P: ExecutionPrimitive> {
    scheduler: &'static Scheduler<P>,
    body: TaskFn<P>,
}

impl<P: ExecutionPrimitive> TaskEntry<P> {
    pub(crate) const fn new(scheduler: &'static Scheduler<P>, body: TaskFn<P>) -> Self {
        Self { scheduler, body }
    }

    /// Run the task body. Returning from the body is an implicit `exit()`.
    ///
    /// Backends end a context without unwinding its stack, so a body that
    /// wraps `exit()` or `kill()` in `catch_unwind` cannot intercept them.
    pub fn run(self) -> ! {
        (self.body)(self.scheduler);
        self.scheduler.exit()
    }

    /// The backend that owns the scheduler this entry belongs to.
    #[inline]
    pub fn primitive(&self) -> &'static P {
        self.scheduler.primitive()
    }
}

impl<P: ExecutionPrimitive> Clone for TaskEntry<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: ExecutionPrimitive> Copy for TaskEntry<P> {}

impl<P: ExecutionPrimitive> fmt::Debug for TaskEntry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("body", &(self.body as *const ()))
            .finish()
    }
}

/// Cooperative execution substrate.
///
/// Only one context runs at a time. A running context keeps the CPU
/// until it calls `suspend_for`, `terminate_current`, or aborts itself.
pub trait ExecutionPrimitive: Sized + Sync + 'static {
    /// One-time setup, from the code that will later call `start`. That
    /// code is not a task.
    fn global_init(&self, config: &SchedulerConfig);

    /// Create a ready context that will run `entry` when first dispatched.
    /// The caller keeps the CPU.
    fn spawn(&self, attrs: SpawnAttributes, entry: TaskEntry<Self>) -> Result<TaskId, SchedError>;

    /// Suspend the calling task for at least `duration`. A zero duration
    /// yields once. Panics with `NoTaskContext` outside a task.
    fn suspend_for(&self, duration: Duration);

    /// End the calling task. Panics with `NoTaskContext` outside a task.
    fn terminate_current(&self) -> !;

    /// End `id` immediately. The victim runs no further code. Aborting
    /// the calling context does not return.
    fn abort(&self, id: TaskId);

    /// Identity of the calling task, `TaskId::NONE` outside one.
    fn current(&self) -> TaskId;

    /// Hand the CPU to the dispatcher for good. The caller becomes the
    /// idle context.
    fn start(&self) -> !;
}
