//! Process Table
//!
//! Fixed-capacity arena of process records. Slots are indexed, never moved,
//! and reused after reap; a slot's identity for the outside world is its
//! `Pid`, which is unique across all slots that are not `Unused`. Every scan
//! here is a plain linear walk — at this table size an index structure would
//! buy nothing and cost auditability.
//!
//! The table itself is a passive data structure; serialization is the
//! manager's job (one lock guards this table, the group table and the
//! per-CPU slots together).

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::{DEFAULT_GROUP, MAX_PROCESSES};
use crate::platform::{ContextId, HandleId, SpaceId};
use crate::process::group::GroupId;
use crate::process::manager::KernelError;
use crate::sync::sleep::Channel;

/// Process ID type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl Pid {
    /// The nil pid carried by `Unused` slots.
    pub const NONE: Pid = Pid(0);
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// Slot is free.
    Unused,
    /// Slot is allocated but the process is still being initialized.
    Embryo,
    /// Process is blocked on a channel.
    Sleeping,
    /// Process is ready to run.
    Runnable,
    /// Process is currently executing on some core.
    Running,
    /// Process has terminated but has not been reaped by its parent.
    Zombie,
}

bitflags::bitflags! {
    /// Per-process flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcFlags: u8 {
        /// Termination is pending; the process observes this cooperatively
        /// and terminates itself at its next checkpoint.
        const KILLED = 1 << 0;
        /// The designated root process: it reaps orphans and must never
        /// exit. Exactly one process ever carries this bit.
        const ROOT = 1 << 1;
    }
}

/// A process record.
pub struct Process {
    /// Process ID; `Pid::NONE` while the slot is `Unused`.
    pub pid: Pid,
    /// Current state.
    pub state: ProcState,
    /// Fairness group this process belongs to; mutable at runtime.
    pub group: GroupId,
    /// Slot index of the parent. Purely relational — re-validate the
    /// referenced slot's state before trusting it.
    pub parent: Option<usize>,
    /// What a `Sleeping` process is waiting for; `None` otherwise.
    pub chan: Option<Channel>,
    /// Flag bits.
    pub flags: ProcFlags,
    /// Process name (debugging).
    pub name: String,
    /// Ticks observed in `Running`.
    pub running_ticks: u64,
    /// Ticks observed in `Runnable`.
    pub runnable_ticks: u64,
    /// Ticks observed in `Sleeping`.
    pub sleeping_ticks: u64,
    /// Address-space size in bytes, maintained by `grow`.
    pub mem_size: usize,
    /// Execution context; fixed one-per-slot.
    pub context: ContextId,
    /// Address space, owned exclusively while alive; released at reap.
    pub space: Option<SpaceId>,
    /// Open resource handles; released at termination.
    pub files: Vec<HandleId>,
    /// Working directory handle; released at termination.
    pub cwd: Option<HandleId>,
}

impl Process {
    /// A fresh `Unused` record for table slot `slot`.
    fn unused(slot: usize) -> Self {
        Process {
            pid: Pid::NONE,
            state: ProcState::Unused,
            group: GroupId(DEFAULT_GROUP),
            parent: None,
            chan: None,
            flags: ProcFlags::empty(),
            name: String::new(),
            running_ticks: 0,
            runnable_ticks: 0,
            sleeping_ticks: 0,
            mem_size: 0,
            context: ContextId(slot),
            space: None,
            files: Vec::new(),
            cwd: None,
        }
    }

    /// True for every state except `Unused`.
    pub fn is_live(&self) -> bool {
        self.state != ProcState::Unused
    }
}

/// The process table.
pub struct ProcessTable {
    slots: [Process; MAX_PROCESSES],
    next_pid: u32,
}

impl ProcessTable {
    /// Create an empty table. Pids start at 1.
    pub fn new() -> Self {
        ProcessTable {
            slots: core::array::from_fn(Process::unused),
            next_pid: 1,
        }
    }

    /// Find an `Unused` slot, move it to `Embryo` and assign a fresh pid
    /// and the default group. Returns the slot index.
    pub fn allocate(&mut self) -> Result<usize, KernelError> {
        let slot = self
            .slots
            .iter()
            .position(|p| p.state == ProcState::Unused)
            .ok_or(KernelError::OutOfProcesses)?;

        let pid = Pid(self.next_pid);
        self.next_pid += 1;

        let p = &mut self.slots[slot];
        p.pid = pid;
        p.state = ProcState::Embryo;
        p.group = GroupId(DEFAULT_GROUP);
        log::debug!("allocated slot {} as pid {}", slot, pid);
        Ok(slot)
    }

    /// Return a slot to `Unused`, clearing every field including the
    /// accounting counters. The reap tail.
    pub fn release(&mut self, slot: usize) {
        self.slots[slot] = Process::unused(slot);
    }

    /// Borrow a slot.
    pub fn slot(&self, slot: usize) -> &Process {
        &self.slots[slot]
    }

    /// Mutably borrow a slot.
    pub fn slot_mut(&mut self, slot: usize) -> &mut Process {
        &mut self.slots[slot]
    }

    /// Find the slot of the live process with this pid.
    pub fn find(&self, pid: Pid) -> Option<usize> {
        self.slots
            .iter()
            .position(|p| p.is_live() && p.pid == pid)
    }

    /// Charge one tick to every live process according to its current
    /// state. Called from the timer hook.
    pub fn tick(&mut self) {
        for p in self.slots.iter_mut() {
            match p.state {
                ProcState::Running => p.running_ticks += 1,
                ProcState::Runnable => p.runnable_ticks += 1,
                ProcState::Sleeping => p.sleeping_ticks += 1,
                _ => {}
            }
        }
    }

    /// Iterate over all slots.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.slots.iter()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
