//! # Kernel
//!
//! The scheduler core and public task API for FlipOS.
//!
//! [`Scheduler`] is the one process-wide scheduler instance. It is built
//! explicitly (usually as a `static` on target, leaked from `main` on
//! host), initialized once with [`Scheduler::init`], and shared by
//! reference with every task: each task body receives
//! `&'static Scheduler<P>`.
//!
//! ## Startup Sequence
//!
//! ```text
//! main()
//!   ├─► SCHED.init()          ← backend setup; the caller is not a task
//!   ├─► SCHED.create(gid, f)  ← register tasks (×N)
//!   └─► SCHED.start()         ← dispatcher takes over (no return)
//! ```
//!
//! ## Killing tasks
//!
//! [`Scheduler::kill`] is a hard abort: the victim never runs another line
//! of its body, not even drop glue on the hardware port. A task that holds
//! something needing deterministic release should hold it only across
//! short stretches with no `sleep` in between.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::Backend;
use crate::config::{SchedulerConfig, TICKS_PER_SECOND};
use crate::error::SchedError;
use crate::policy;
use crate::primitive::{ExecutionPrimitive, SpawnAttributes, TaskEntry, TaskFn};
use crate::registry::Registry;
use crate::sync::{self, Mutex};
use crate::task::{GroupId, TaskId, Ticks};

pub struct Scheduler<P: ExecutionPrimitive = Backend> {
    primitive: P,
    config: SchedulerConfig,
    registry: Mutex<RefCell<Registry>>,
    initialized: AtomicBool,
}

impl<P: ExecutionPrimitive> Scheduler<P> {
    pub const fn new(primitive: P, config: SchedulerConfig) -> Self {
        Self {
            primitive,
            config,
            registry: Mutex::new(RefCell::new(Registry::new())),
            initialized: AtomicBool::new(false),
        }
    }

    /// Initialize the backend. Must be called exactly once, before any
    /// other operation.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::AcqRel) {
            panic!("{}", SchedError::AlreadyInitialized);
        }
        self.primitive.global_init(&self.config);
        log::info!(
            "scheduler: tick {}us (rate x{})",
            self.config.tick_micros(),
            self.config.rate_multiplier.get()
        );
    }

    /// Hand the CPU to the dispatcher. Does not return.
    pub fn start(&self) -> ! {
        self.ensure_initialized();
        log::debug!("scheduler: dispatcher started with {} tasks", self.task_count());
        self.primitive.start()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Create a task in group `gid` running `body`. The caller keeps the
    /// CPU; the new task first runs at the caller's next suspension.
    ///
    /// # Panics
    /// If no execution context is free.
    pub fn create(&'static self, gid: GroupId, body: TaskFn<P>) -> TaskId {
        self.ensure_initialized();
        let attrs = SpawnAttributes::task(policy::priority_of(gid));
        let pid = match self.primitive.spawn(attrs, TaskEntry::new(self, body)) {
            Ok(pid) => pid,
            Err(e) => panic!("create {gid}: {e}"),
        };
        if let Err(e) = self.with_registry(|r| r.insert(pid, gid)) {
            panic!("create {gid}: {e}");
        }
        log::debug!("create: {pid} gid={gid} prio={:?}", attrs.priority);
        pid
    }

    /// Kill every other task of `gid`, then create a fresh one.
    pub fn recreate(&'static self, gid: GroupId, body: TaskFn<P>) -> TaskId {
        self.kill_group(gid);
        self.create(gid, body)
    }

    /// Return the live task of `gid` if there is one, else create it.
    pub fn create_if_absent(&'static self, gid: GroupId, body: TaskFn<P>) -> TaskId {
        match self.find_group(gid) {
            Some(pid) => pid,
            None => self.create(gid, body),
        }
    }

    /// End the calling task. Its registry entry is gone before the
    /// context terminates.
    pub fn exit(&self) -> ! {
        let pid = self.primitive.current();
        let gid = self.with_registry(|r| r.remove(pid));
        log::trace!("exit: {pid} gid={gid:?}");
        self.primitive.terminate_current()
    }

    /// Abort task `pid` immediately, wherever it is suspended.
    ///
    /// `TaskId::NONE` is a no-op. Killing the calling task does not
    /// return.
    ///
    /// # Panics
    /// If `pid` is not a live task: a stale pid is a bug in the caller.
    pub fn kill(&self, pid: TaskId) {
        if pid.is_none() {
            return;
        }
        match self.with_registry(|r| r.remove(pid)) {
            Some(gid) => {
                log::debug!("kill: {pid} gid={gid}");
                self.primitive.abort(pid);
            }
            None => panic!("kill: {}", SchedError::StaleTask(pid)),
        }
    }

    /// Kill every task of `gid` except the caller. Returns how many died.
    pub fn kill_group(&self, gid: GroupId) -> usize {
        let me = self.primitive.current();
        let victims = self.with_registry(|r| r.members(gid));
        let mut killed = 0;
        for pid in victims.into_iter().filter(|pid| *pid != me) {
            self.kill(pid);
            killed += 1;
        }
        if killed > 0 {
            log::debug!("kill_group: {gid} ({killed} tasks)");
        }
        killed
    }

    /// Identity of the calling task. Stable for the task's lifetime;
    /// `TaskId::NONE` outside any task.
    #[inline]
    pub fn current(&self) -> TaskId {
        self.primitive.current()
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    /// Suspend the calling task for at least `ticks` ticks. `sleep(0)`
    /// yields to any other ready task.
    ///
    /// # Panics
    /// If the caller is not a task, e.g. the init code before `start`.
    pub fn sleep(&self, ticks: Ticks) {
        self.primitive
            .suspend_for(self.config.ticks_to_duration(ticks));
    }

    /// Suspend the calling task for at least `seconds` seconds.
    pub fn sleep_seconds(&self, seconds: u32) {
        self.sleep(seconds.saturating_mul(TICKS_PER_SECOND));
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Any live task of `gid`.
    pub fn find_group(&self, gid: GroupId) -> Option<TaskId> {
        self.with_registry(|r| r.find(gid))
    }

    /// Group of a live task, `None` once it has ended.
    pub fn group_of(&self, pid: TaskId) -> Option<GroupId> {
        self.with_registry(|r| r.lookup(pid))
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.with_registry(|r| r.len())
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[inline]
    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    fn with_registry<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        sync::locked(&self.registry, f)
    }

    fn ensure_initialized(&self) {
        if !self.initialized.load(Ordering::Acquire) {
            panic!("{}", SchedError::NotInitialized);
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
