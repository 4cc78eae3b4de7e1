//! # Task Table
//!
//! Tick-driven dispatch bookkeeping for the hardware port. Holds the
//! fixed TCB pool and decides which slot runs next; the arch layer only
//! saves and restores registers around these decisions.
//!
//! ## Scheduling Algorithm
//!
//! At each SysTick interrupt:
//! 1. **Advance time**: increment the tick counter
//! 2. **Wake sleepers**: every sleeping TCB whose wake tick has passed
//!    becomes Ready
//! 3. **Nudge idle**: if the idle context holds the CPU and something
//!    woke, request a context switch
//!
//! At each context switch (PendSV):
//! 1. **Requeue**: a still-Running current task becomes Ready
//! 2. **Select**: highest priority Ready TCB, oldest first among equals
//!
//! There is no time slicing. A task only loses the CPU by suspending,
//! terminating, or being aborted.

use crate::config::MAX_TASKS;
use crate::error::SchedError;
use crate::task::{Priority, TaskControlBlock, TaskId, TaskState, Ticks};

/// Slot reserved for the idle context.
pub const IDLE_SLOT: usize = 0;

/// Pool size: every task plus the idle context.
pub const SLOTS: usize = MAX_TASKS + 1;

pub struct TaskTable<E> {
    /// Fixed-size pool of TCBs. Slot 0 is reserved for the idle context.
    pub tasks: [TaskControlBlock<E>; SLOTS],

    /// Slot of the context that holds the CPU.
    pub current_task: usize,

    /// Number of allocated task slots (idle excluded).
    pub task_count: usize,

    /// Monotonic tick counter.
    pub tick_count: u64,

    next_seq: u32,
}

impl<E: Copy> TaskTable<E> {
    pub const fn new() -> Self {
        Self {
            tasks: [const { TaskControlBlock::EMPTY }; SLOTS],
            current_task: IDLE_SLOT,
            task_count: 0,
            tick_count: 0,
            next_seq: 0,
        }
    }

    /// Claim the idle slot. The idle context is always runnable, at a
    /// priority below every task.
    pub fn install_idle(&mut self) {
        let seq = self.bump_seq();
        self.tasks[IDLE_SLOT].init(IDLE_SLOT, Priority::Idle, None, seq);
        self.current_task = IDLE_SLOT;
    }

    /// Register a new task.
    ///
    /// # Returns
    /// - `Ok(slot)`: the pool slot of the new task, now Ready
    /// - `Err(SchedError::PoolExhausted)`: every slot is taken
    pub fn allocate(&mut self, priority: Priority, entry: E) -> Result<usize, SchedError> {
        let slot = (IDLE_SLOT + 1..SLOTS)
            .find(|&i| self.tasks[i].is_free())
            .ok_or(SchedError::PoolExhausted)?;
        let seq = self.bump_seq();
        self.tasks[slot].init(slot, priority, Some(entry), seq);
        self.task_count += 1;
        Ok(slot)
    }

    /// Slot of a live task, if `id` still names one.
    pub fn lookup(&self, id: TaskId) -> Option<usize> {
        let slot = id.slot();
        if slot == IDLE_SLOT || slot >= SLOTS {
            return None;
        }
        let tcb = &self.tasks[slot];
        (!tcb.is_free() && tcb.id == id).then_some(slot)
    }

    /// Called from the SysTick handler every tick.
    ///
    /// Returns `true` when a task woke up while the idle context holds the
    /// CPU, i.e. a context switch should be requested.
    pub fn tick(&mut self) -> bool {
        self.tick_count += 1;
        let now = self.tick_count;

        let mut woke = false;
        for i in 0..SLOTS {
            if matches!(self.tasks[i].state, TaskState::Sleeping { .. }) {
                let seq = self.bump_seq();
                woke |= self.tasks[i].wake_if_due(now, seq);
            }
        }
        woke && self.current_task == IDLE_SLOT
    }

    /// Put the current task to sleep for `ticks` ticks; zero just yields.
    ///
    /// Sleeping runs one extra tick: the next SysTick may be only a
    /// fraction of a period away. The idle context, which is also the
    /// code running before `start`, cannot sleep.
    pub fn suspend_current(&mut self, ticks: Ticks) -> Result<(), SchedError> {
        let current = self.running_task()?;
        if ticks == 0 {
            let seq = self.bump_seq();
            self.tasks[current].state = TaskState::Ready;
            self.tasks[current].seq = seq;
        } else {
            let wake_tick = self.tick_count + u64::from(ticks) + 1;
            self.tasks[current].state = TaskState::Sleeping { wake_tick };
        }
        Ok(())
    }

    /// Free the current task's slot. The caller must switch away without
    /// touching the task's stack again.
    pub fn terminate_current(&mut self) -> Result<(), SchedError> {
        let current = self.running_task()?;
        self.release(current);
        Ok(())
    }

    /// Free the slot of `id`.
    ///
    /// # Returns
    /// - `Ok(true)`: `id` was the current task; the caller must switch away
    /// - `Ok(false)`: `id` was suspended and will never run again
    /// - `Err(SchedError::StaleTask)`: `id` is not live
    pub fn abort(&mut self, id: TaskId) -> Result<bool, SchedError> {
        let slot = self.lookup(id).ok_or(SchedError::StaleTask(id))?;
        self.release(slot);
        Ok(slot == self.current_task)
    }

    /// Select the next context to run and make it current.
    ///
    /// If nothing is runnable, returns the idle slot.
    ///
    /// # Returns
    /// Slot of the next context.
    pub fn schedule(&mut self) -> usize {
        let prev = self.current_task;
        if self.tasks[prev].state == TaskState::Running {
            let seq = self.bump_seq();
            self.tasks[prev].state = TaskState::Ready;
            self.tasks[prev].seq = seq;
        }

        let mut best = IDLE_SLOT;
        let mut best_key: Option<(Priority, core::cmp::Reverse<u32>)> = None;
        for (i, tcb) in self.tasks.iter().enumerate() {
            if !tcb.is_runnable() {
                continue;
            }
            let key = (tcb.priority, core::cmp::Reverse(tcb.seq));
            if best_key.map_or(true, |b| key > b) {
                best_key = Some(key);
                best = i;
            }
        }

        self.tasks[best].state = TaskState::Running;
        self.current_task = best;
        best
    }

    /// Identity of the task holding the CPU, `TaskId::NONE` for idle.
    #[inline]
    pub fn current_id(&self) -> TaskId {
        match self.current_task {
            IDLE_SLOT => TaskId::NONE,
            slot => self.tasks[slot].id,
        }
    }

    /// Entry payload of the context holding the CPU.
    #[inline]
    pub fn current_entry(&self) -> Option<E> {
        self.tasks[self.current_task].entry
    }

    /// Get a reference to the current task's TCB.
    pub fn current_tcb(&self) -> &TaskControlBlock<E> {
        &self.tasks[self.current_task]
    }

    /// Get a mutable reference to the current task's TCB.
    pub fn current_tcb_mut(&mut self) -> &mut TaskControlBlock<E> {
        &mut self.tasks[self.current_task]
    }

    fn running_task(&self) -> Result<usize, SchedError> {
        match self.current_task {
            IDLE_SLOT => Err(SchedError::NoTaskContext),
            slot => Ok(slot),
        }
    }

    fn release(&mut self, slot: usize) {
        self.tasks[slot].release();
        self.task_count -= 1;
    }

    fn bump_seq(&mut self) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }
}

impl<E: Copy> Default for TaskTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
