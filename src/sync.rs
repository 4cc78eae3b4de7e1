//! # Synchronization Primitives
//!
//! Critical-section helpers for the scheduler's shared state. On the
//! Cortex-M4 the `critical-section` implementation masks interrupts
//! (`cortex-m`'s single-core impl); on host it is a process-wide lock.
//!
//! Keep critical sections short, and never suspend, spawn, or abort a
//! context while holding one.

use core::cell::RefCell;

pub use critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}

/// Borrow the value in `cell` mutably for the duration of `f`.
#[inline]
pub fn locked<T, R>(cell: &Mutex<RefCell<T>>, f: impl FnOnce(&mut T) -> R) -> R {
    critical_section(|cs| f(&mut *cell.borrow_ref_mut(cs)))
}
