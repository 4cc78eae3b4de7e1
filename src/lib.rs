//! # FlipOS: Pinball Machine Task Scheduler
//!
//! A cooperative task scheduler for coin-operated pinball machine
//! firmware. Lamp and sound effects, switch handlers, display animations,
//! and timing-critical input polling all run as tasks on one CPU, with no
//! preemption: a task keeps the CPU until it sleeps, exits, or is killed.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │            Game code (effects, switches, modes)        │
//! ├────────────────────────────────────────────────────────┤
//! │              Scheduler core (kernel.rs)                │
//! │  create · sleep · sleep_seconds · exit · kill · current│
//! ├──────────────┬─────────────────┬──────────────────────┤
//! │ Group policy │  Task registry  │  Tick conversion     │
//! │  policy.rs   │  registry.rs    │  config.rs           │
//! ├──────────────┴─────────────────┴──────────────────────┤
//! │       Execution primitive contract (primitive.rs)      │
//! ├───────────────────────────┬────────────────────────────┤
//! │  arch/cortex_m4.rs        │  arch/host.rs              │
//! │  SysTick · PendSV         │  stackful coroutines       │
//! │  TaskTable (scheduler.rs) │  on one dispatch thread    │
//! └───────────────────────────┴────────────────────────────┘
//! ```
//!
//! ## Groups and Priority
//!
//! Every task belongs to a group fixed at creation. Two groups are
//! elevated, timekeeping above user input; everything else runs at
//! baseline. Priority only orders dispatch among ready tasks.
//!
//! ## Time
//!
//! Tasks sleep in ticks. A tick lasts `BASE_MICROSECONDS /
//! rate_multiplier`: 16 ms on the machine, shorter when the simulator
//! runs faster than real time. A sleep never ends early.
//!
//! ## Memory Model (target)
//!
//! - **No heap**: the TCB pool and the registry are fixed-size
//! - **Per-task stack**: `[u8; STACK_SIZE]` inline in each TCB
//! - **Critical sections**: `critical-section` (interrupts masked) for
//!   shared state

#![cfg_attr(target_os = "none", no_std)]

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod policy;
pub mod primitive;
pub mod registry;
pub mod scheduler;
pub mod sync;
pub mod task;

pub use config::SchedulerConfig;
pub use error::SchedError;
pub use kernel::Scheduler;
pub use primitive::{ExecutionPrimitive, TaskFn};
pub use task::{GroupId, Priority, TaskId, Ticks};
