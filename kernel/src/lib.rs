//! StrideOS Scheduling Core
//!
//! This crate implements the process-table and scheduler subsystem of
//! StrideOS: a preemptible, multi-core scheduler with a two-level fairness
//! policy — stride scheduling across process groups, round robin within a
//! group — together with the full process lifecycle (spawn, block, wake,
//! terminate, reap) and per-process CPU/wait/sleep accounting.
//!
//! Machine-dependent pieces (address spaces, the register-level context
//! switch, resource handles, the timer) are collaborators behind the traits
//! in [`platform`]; the core itself is freestanding.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod platform;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod tests;

pub use process::group::GroupId;
pub use process::manager::{Current, KernelError, ProcInfo, ProcessManager};
pub use process::table::{Pid, ProcFlags, ProcState};
pub use scheduler::Dispatched;
pub use sync::sleep::Channel;
