//! External collaborator interfaces.
//!
//! The scheduling core owns process and group state but none of the machine
//! state behind it. Address spaces, the register-level context switch,
//! resource handles (open files, working directory) and the idle window are
//! provided by the embedder through the traits below. The core only moves
//! opaque ids around and calls duplicate/release at the lifecycle points the
//! process table dictates.

use crate::process::manager::KernelError;

/// Opaque execution-context id.
///
/// Context ids are dense: one per process-table slot (`0..MAX_PROCESSES`)
/// plus one per CPU for that core's scheduler context
/// (`MAX_PROCESSES..MAX_PROCESSES + MAX_CPUS`). A slot's context id is fixed
/// for the lifetime of the table; `retire` ends one incarnation and a later
/// `prepare`/`fork` into the same id starts the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub usize);

/// Opaque address-space id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpaceId(pub u64);

/// Opaque resource-handle id (open file, working directory).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(pub u64);

/// The register-level save/restore primitive.
pub trait ContextSwitch {
    /// Set up a fresh execution context for a newly created process so that
    /// the first switch into it starts the process at its entry point.
    fn prepare(&self, ctx: ContextId) -> Result<(), KernelError>;

    /// Duplicate `parent`'s saved execution state into `child` so the child
    /// appears to return from the same point as the parent, with the
    /// distinguished child-identifying return value.
    fn fork(&self, parent: ContextId, child: ContextId) -> Result<(), KernelError>;

    /// Save the running context into `save` and resume `resume`.
    ///
    /// Returns only when something later switches back into `save`. The
    /// core never holds its table lock across this call.
    fn switch(&self, save: ContextId, resume: ContextId);

    /// Release the execution context (kernel stack) of a reaped process.
    fn retire(&self, ctx: ContextId);
}

/// Address-space management facility.
pub trait AddressSpaces {
    /// Create the initial address space for the root process.
    fn create_space(&self) -> Result<SpaceId, KernelError>;

    /// Duplicate an address space for a forked child.
    fn duplicate_space(&self, space: SpaceId) -> Result<SpaceId, KernelError>;

    /// Grow (`delta > 0`) or shrink (`delta < 0`) an address space.
    /// Returns the new size in bytes.
    fn resize_space(&self, space: SpaceId, delta: isize) -> Result<usize, KernelError>;

    /// Release an address space at reap time.
    fn release_space(&self, space: SpaceId);
}

/// Resource-handle facility (open files, working directory).
pub trait Handles {
    /// Duplicate a handle for a forked child.
    fn duplicate_handle(&self, handle: HandleId) -> HandleId;

    /// Release a handle at termination time.
    fn release_handle(&self, handle: HandleId);
}

/// Idle hook, called by a scheduler loop that found nothing runnable.
///
/// Runs with the table lock released and stands in for the
/// interrupts-enabled idle window in which timer or IO interrupts may
/// create new work.
pub trait Idle {
    fn idle(&self, core: usize);
}

/// Everything the scheduling core needs from the embedder.
pub trait Platform: ContextSwitch + AddressSpaces + Handles + Idle + Send + Sync {}

impl<T: ContextSwitch + AddressSpaces + Handles + Idle + Send + Sync> Platform for T {}
