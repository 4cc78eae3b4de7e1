//! # Task Model
//!
//! Identities, groups, and priorities shared by every part of the
//! scheduler, plus the Task Control Block used by the hardware port.
//!
//! A task is named by a [`TaskId`] (pid) handed out by the execution
//! backend and belongs to exactly one [`GroupId`] (gid) for its whole
//! life. The gid fixes the task's [`Priority`] through the group policy
//! in [`crate::policy`]; priority is never set directly.

use core::fmt;

use crate::config::STACK_SIZE;

/// Logical time unit of the firmware. One tick lasts
/// `BASE_MICROSECONDS / rate_multiplier` microseconds.
pub type Ticks = u32;

// ---------------------------------------------------------------------------
// Task identity
// ---------------------------------------------------------------------------

/// Opaque identity of a live task.
///
/// Unique among live tasks. Meaningless once the task has terminated;
/// callers must not keep a pid past the task's end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    /// Sentinel meaning "no task". Killing it is a no-op.
    pub const NONE: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Hardware pid layout: generation in the upper bits, pool slot in
    /// the low byte. The generation is never zero, so neither is the pid.
    #[inline]
    pub const fn from_slot(slot: usize, generation: u16) -> Self {
        Self(((generation as u32) << 8) | (slot as u32 & 0xFF))
    }

    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn slot(self) -> usize {
        (self.0 & 0xFF) as usize
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("pid:none")
        } else {
            write!(f, "pid:{:#x}", self.0)
        }
    }
}

// ---------------------------------------------------------------------------
// Group ids
// ---------------------------------------------------------------------------

/// Group a task belongs to. Encodes the task's role and, through the
/// policy table, its priority tier.
///
/// The system groups are named constants below. Machine code allocates
/// its own groups with [`GroupId::app`]; those always run at baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(u8);

impl GroupId {
    /// Timekeeping: realtime clock and tick accounting.
    pub const REALTIME: Self = Self(1);
    /// User input: switch matrix polling and simulator key handling.
    pub const INTERFACE: Self = Self(2);
    pub const SWITCH_HANDLER: Self = Self(3);
    pub const LAMP_EFFECT: Self = Self(4);
    pub const SOUND_EFFECT: Self = Self(5);
    pub const DISPLAY_EFFECT: Self = Self(6);
    pub const BALL_SEARCH: Self = Self(7);
    pub const GAME_LOGIC: Self = Self(8);
    pub const ATTRACT_MODE: Self = Self(9);

    /// First gid available to machine-specific code.
    pub const APP_BASE: u8 = 64;

    #[inline]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Machine-specific group number `n`, saturating at the top of the range.
    #[inline]
    pub const fn app(n: u8) -> Self {
        Self(Self::APP_BASE.saturating_add(n))
    }

    #[inline]
    pub const fn as_raw(self) -> u8 {
        self.0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::REALTIME => "realtime",
            Self::INTERFACE => "interface",
            Self::SWITCH_HANDLER => "switch-handler",
            Self::LAMP_EFFECT => "lamp-effect",
            Self::SOUND_EFFECT => "sound-effect",
            Self::DISPLAY_EFFECT => "display-effect",
            Self::BALL_SEARCH => "ball-search",
            Self::GAME_LOGIC => "game-logic",
            Self::ATTRACT_MODE => "attract-mode",
            _ => return None,
        })
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "gid:{}", self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Priority tiers
// ---------------------------------------------------------------------------

/// Dispatch priority. Ordered: a greater value is dispatched first when
/// several contexts are ready at the same decision point.
///
/// Priority only orders dispatch. It never interrupts a running task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Reserved for a backend's idle context; never produced by the
    /// group policy.
    Idle,
    Baseline,
    Interface,
    Timekeeping,
}

// ---------------------------------------------------------------------------
// Task Control Block (hardware port)
// ---------------------------------------------------------------------------

/// Execution state of a pool slot.
///
/// ```text
///   ┌──────────┐     schedule()      ┌─────────┐
///   │  Ready   │ ──────────────────► │ Running │
///   └──────────┘                     └─────────┘
///        ▲                                │
///        │   tick() past wake_tick        │ suspend(n)
///        │                                ▼
///        │                          ┌──────────┐
///        └───────────────────────── │ Sleeping │
///                                   └──────────┘
///   exit / abort from any state ──► Free
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot is unallocated.
    Free,
    Ready,
    Running,
    /// Not runnable until the tick counter reaches `wake_tick`.
    Sleeping { wake_tick: u64 },
}

/// Task stack, aligned to 8 bytes as required by ARM AAPCS.
#[repr(C, align(8))]
pub struct Stack(pub [u8; STACK_SIZE]);

impl Stack {
    #[inline]
    pub fn top(&self) -> usize {
        self.0.as_ptr() as usize + STACK_SIZE
    }
}

/// Task Control Block. One per pool slot; `E` is the entry payload the
/// port stores for the task trampoline.
pub struct TaskControlBlock<E> {
    /// Identity of the task currently occupying this slot.
    pub id: TaskId,

    /// Bumped on every allocation so a reused slot gets a fresh pid.
    pub generation: u16,

    pub state: TaskState,

    pub priority: Priority,

    /// What the trampoline runs once the task is first dispatched.
    /// `None` for the idle context.
    pub entry: Option<E>,

    /// Readiness order; lower values became ready earlier.
    pub seq: u32,

    /// Saved stack pointer (PSP). Updated on context switch.
    /// Points into `self.stack`.
    pub stack_pointer: *mut u32,

    pub stack: Stack,
}

// Safety: `stack_pointer` always points into the TCB's own stack, and
// TCBs are only touched inside critical sections on a single core.
unsafe impl<E> Send for TaskControlBlock<E> {}

impl<E> TaskControlBlock<E> {
    /// An unallocated slot. Used to initialize the static pool.
    pub const EMPTY: Self = Self {
        id: TaskId::NONE,
        generation: 0,
        state: TaskState::Free,
        priority: Priority::Baseline,
        entry: None,
        seq: 0,
        stack_pointer: core::ptr::null_mut(),
        stack: Stack([0u8; STACK_SIZE]),
    };

    /// Claim this slot for a new task and make it ready.
    ///
    /// The stack frame must be separately prepared by the port.
    pub fn init(&mut self, slot: usize, priority: Priority, entry: Option<E>, seq: u32) {
        self.generation = match self.generation.wrapping_add(1) {
            0 => 1,
            g => g,
        };
        self.id = TaskId::from_slot(slot, self.generation);
        self.state = TaskState::Ready;
        self.priority = priority;
        self.entry = entry;
        self.seq = seq;
        self.stack_pointer = core::ptr::null_mut();
    }

    /// Return the slot to the pool. The generation survives so the next
    /// occupant gets a different pid.
    pub fn release(&mut self) {
        self.id = TaskId::NONE;
        self.state = TaskState::Free;
        self.entry = None;
        self.stack_pointer = core::ptr::null_mut();
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.state == TaskState::Free
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Ready
    }

    /// Wake the task if its sleep has run out. Returns `true` on wake-up.
    pub fn wake_if_due(&mut self, now: u64, seq: u32) -> bool {
        match self.state {
            TaskState::Sleeping { wake_tick } if wake_tick <= now => {
                self.state = TaskState::Ready;
                self.seq = seq;
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcb_initialization() {
        let mut tcb: Box<TaskControlBlock<u32>> = Box::new(TaskControlBlock::EMPTY);
        assert!(tcb.is_free());

        tcb.init(3, Priority::Interface, Some(7), 11);
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.priority, Priority::Interface);
        assert_eq!(tcb.entry, Some(7));
        assert_eq!(tcb.id.slot(), 3);
        assert!(!tcb.id.is_none());
    }

    #[test]
    fn test_reused_slot_gets_new_pid() {
        let mut tcb: Box<TaskControlBlock<()>> = Box::new(TaskControlBlock::EMPTY);
        tcb.init(2, Priority::Baseline, None, 0);
        let first = tcb.id;
        tcb.release();
        assert!(tcb.is_free());
        tcb.init(2, Priority::Baseline, None, 1);
        assert_ne!(first, tcb.id);
        assert_eq!(first.slot(), tcb.id.slot());
    }

    #[test]
    fn test_generation_skips_zero() {
        let mut tcb: Box<TaskControlBlock<()>> = Box::new(TaskControlBlock::EMPTY);
        tcb.generation = u16::MAX;
        tcb.init(1, Priority::Baseline, None, 0);
        assert_eq!(tcb.generation, 1);
        assert!(!tcb.id.is_none());
    }

    #[test]
    fn test_wake_if_due() {
        let mut tcb: Box<TaskControlBlock<()>> = Box::new(TaskControlBlock::EMPTY);
        tcb.init(1, Priority::Baseline, None, 0);
        tcb.state = TaskState::Sleeping { wake_tick: 10 };

        assert!(!tcb.wake_if_due(9, 5));
        assert!(tcb.wake_if_due(10, 5));
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.seq, 5);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Timekeeping > Priority::Interface);
        assert!(Priority::Interface > Priority::Baseline);
        assert!(Priority::Baseline > Priority::Idle);
    }

    #[test]
    fn test_display() {
        assert_eq!(TaskId::NONE.to_string(), "pid:none");
        assert_eq!(TaskId::from_raw(0x105).to_string(), "pid:0x105");
        assert_eq!(GroupId::REALTIME.to_string(), "realtime");
        assert_eq!(GroupId::app(3).to_string(), "gid:67");
    }
}
