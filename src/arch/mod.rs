//! # Architecture Abstraction Layer
//!
//! One execution backend per build target, selected at compile time:
//! the Cortex-M4 port on bare metal, the thread-based simulator on any
//! hosted target. [`Backend`] names whichever one is linked.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(not(target_os = "none"))]
pub mod host;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub type Backend = cortex_m4::CortexM4;

#[cfg(not(target_os = "none"))]
pub type Backend = host::HostBackend;
