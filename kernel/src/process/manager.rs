//! Process Manager
//!
//! The owner of all shared scheduling state and the lifecycle operations
//! that drive the process state machine: bootstrap, spawn (fork), exit,
//! wait/waitx, kill, group assignment, tick accounting and diagnostics.
//!
//! Exactly one lock serializes every read and write of the process table,
//! the group table and the per-CPU slots. Platform calls (address-space and
//! handle duplication, context setup) run with the lock released; a slot in
//! `Embryo` state keeps the half-built process invisible to the scheduler
//! and to pid lookups by other cores in the meantime.

use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{MAX_CPUS, MAX_PROCESSES};
use crate::platform::{ContextId, Platform};
use crate::process::group::{GroupId, GroupTable};
use crate::process::table::{Pid, ProcFlags, ProcState, ProcessTable};
use crate::sync::sleep::Channel;

/// Errors surfaced to callers of lifecycle operations.
///
/// All of these are recovered locally and reported to the immediate caller;
/// none escalates into a crash. Broken invariants (an operation invoked
/// from a context that is not running, the root process exiting) are
/// programming errors inside the core and panic instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No free process-table slot.
    OutOfProcesses,
    /// No free group-table slot for a new group id.
    OutOfGroups,
    /// Address-space creation, duplication or resize failed.
    OutOfMemory,
    /// The pid does not name a live process.
    NoSuchProcess,
    /// The caller has no children (or was killed while waiting).
    NoChildren,
    /// The caller was killed while blocked.
    Killed,
    /// `bootstrap` was called on an already-bootstrapped manager.
    AlreadyBootstrapped,
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            KernelError::OutOfProcesses => "process table is full",
            KernelError::OutOfGroups => "group table is full",
            KernelError::OutOfMemory => "address-space operation failed",
            KernelError::NoSuchProcess => "no live process with that pid",
            KernelError::NoChildren => "caller has no children",
            KernelError::Killed => "caller was killed",
            KernelError::AlreadyBootstrapped => "root process already exists",
        };
        f.write_str(msg)
    }
}

/// Identity of the process invoking an operation.
///
/// Handed to a process's execution context when it is first dispatched and
/// passed back on every call the process makes on its own behalf. The token
/// is the process's table slot; the manager re-validates it (the slot must
/// hold a `Running` process) on every use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Current(pub usize);

/// Per-CPU scheduler state.
pub(crate) struct CpuSlot {
    /// Slot of the process this core is running, if any. Written by the
    /// core's own dispatch; cleared by the bound process when it hands the
    /// core back (and again, idempotently, by the dispatch epilogue).
    pub(crate) current: Option<usize>,
    /// This core's scheduler execution context.
    pub(crate) sched_ctx: ContextId,
}

/// Everything the one scheduler lock guards.
pub(crate) struct SchedState {
    pub(crate) procs: ProcessTable,
    pub(crate) groups: GroupTable,
    pub(crate) cpus: [CpuSlot; MAX_CPUS],
    /// Global clock, advanced once per timer tick.
    pub(crate) ticks: u64,
    /// Completed dispatch rounds across all cores.
    pub(crate) sched_rounds: u64,
    /// Times the per-group scan disagreed with `has_runnable`. Should not
    /// happen under the lock discipline; counted for diagnostics.
    pub(crate) race_fallbacks: u64,
    /// Slot of the root process, once bootstrapped.
    pub(crate) root: Option<usize>,
}

/// Read-only view of one process, for diagnostics listings.
#[derive(Debug, Clone)]
pub struct ProcInfo {
    pub pid: Pid,
    pub name: String,
    pub state: ProcState,
    pub group: GroupId,
    pub parent: Option<Pid>,
    pub running_ticks: u64,
    pub runnable_ticks: u64,
    pub sleeping_ticks: u64,
}

/// The process-table and scheduler subsystem.
pub struct ProcessManager<P: Platform> {
    pub(crate) state: Mutex<SchedState>,
    pub(crate) platform: P,
}

impl<P: Platform> ProcessManager<P> {
    /// Create an empty manager. Core `i`'s scheduler context is
    /// `ContextId(MAX_PROCESSES + i)`.
    pub fn new(platform: P) -> Self {
        ProcessManager {
            state: Mutex::new(SchedState {
                procs: ProcessTable::new(),
                groups: GroupTable::new(),
                cpus: core::array::from_fn(|i| CpuSlot {
                    current: None,
                    sched_ctx: ContextId(MAX_PROCESSES + i),
                }),
                ticks: 0,
                sched_rounds: 0,
                race_fallbacks: 0,
                root: None,
            }),
            platform,
        }
    }

    /// Borrow the platform.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Resolve and validate the caller's slot. Panics if the token does not
    /// name a running process — that is a broken invariant, not a runtime
    /// condition.
    pub(crate) fn current_slot(&self, st: &SchedState, cur: Current) -> usize {
        let p = st.procs.slot(cur.0);
        assert!(
            p.state == ProcState::Running,
            "operation from pid {} in state {:?}",
            p.pid,
            p.state
        );
        cur.0
    }

    /// Which core is running this slot. Panics if none is — callers only
    /// ask about processes that are mid-quantum.
    pub(crate) fn running_core(&self, st: &SchedState, slot: usize) -> usize {
        st.cpus
            .iter()
            .position(|c| c.current == Some(slot))
            .expect("running process is not bound to any core")
    }

    /// Roll a half-built slot back to `Unused` after a failed creation.
    fn rollback(&self, slot: usize) {
        let mut st = self.state.lock();
        debug_assert_eq!(st.procs.slot(slot).state, ProcState::Embryo);
        st.procs.release(slot);
    }

    /// Create the root process (pid 1): fresh address space, fresh
    /// execution context, `ROOT` flag, default group, state `Runnable`.
    ///
    /// The root is the designated reaper of orphans and must never exit.
    pub fn bootstrap(&self, name: &str) -> Result<Pid, KernelError> {
        let mut st = self.state.lock();
        if st.root.is_some() {
            return Err(KernelError::AlreadyBootstrapped);
        }
        let slot = st.procs.allocate()?;
        let ctx = st.procs.slot(slot).context;
        drop(st);

        let space = match self.platform.create_space() {
            Ok(space) => space,
            Err(e) => {
                self.rollback(slot);
                return Err(e);
            }
        };
        if let Err(e) = self.platform.prepare(ctx) {
            self.platform.release_space(space);
            self.rollback(slot);
            return Err(e);
        }

        let mut st = self.state.lock();
        let pid;
        {
            let p = st.procs.slot_mut(slot);
            p.name = String::from(name);
            p.space = Some(space);
            p.flags |= ProcFlags::ROOT;
            p.state = ProcState::Runnable;
            pid = p.pid;
        }
        st.root = Some(slot);
        log::info!("bootstrapped root process {} (pid {})", name, pid);
        Ok(pid)
    }

    /// Fork the calling process.
    ///
    /// The child inherits the caller's address space (copied), open
    /// handles (duplicated), name, memory size and fairness group, and its
    /// execution context is duplicated so it resumes from the same point
    /// with the distinguished child return value. On any failure the
    /// half-allocated slot is rolled back and nothing else changes.
    pub fn spawn(&self, cur: Current) -> Result<Pid, KernelError> {
        let mut st = self.state.lock();
        let parent = self.current_slot(&st, cur);
        let parent_group = st.procs.slot(parent).group;
        // The group is active because the parent is in it; mirror the
        // reference behavior of re-ensuring anyway, before anything is
        // allocated.
        st.groups.ensure(parent_group)?;

        let child = st.procs.allocate()?;
        let child_ctx = st.procs.slot(child).context;
        let parent_ctx = st.procs.slot(parent).context;
        let parent_space = st
            .procs
            .slot(parent)
            .space
            .expect("running process has no address space");
        let name = st.procs.slot(parent).name.clone();
        let mem_size = st.procs.slot(parent).mem_size;
        let files = st.procs.slot(parent).files.clone();
        let cwd = st.procs.slot(parent).cwd;
        drop(st);

        let space = match self.platform.duplicate_space(parent_space) {
            Ok(space) => space,
            Err(e) => {
                self.rollback(child);
                return Err(e);
            }
        };
        if let Err(e) = self.platform.fork(parent_ctx, child_ctx) {
            self.platform.release_space(space);
            self.rollback(child);
            return Err(e);
        }
        let files: Vec<_> = files
            .iter()
            .map(|&h| self.platform.duplicate_handle(h))
            .collect();
        let cwd = cwd.map(|h| self.platform.duplicate_handle(h));

        let mut st = self.state.lock();
        let pid;
        {
            let p = st.procs.slot_mut(child);
            p.name = name;
            p.mem_size = mem_size;
            p.space = Some(space);
            p.files = files;
            p.cwd = cwd;
            p.parent = Some(parent);
            p.group = parent_group;
            p.state = ProcState::Runnable;
            pid = p.pid;
        }
        log::debug!("pid {} spawned pid {}", st.procs.slot(parent).pid, pid);
        Ok(pid)
    }

    /// Terminate the calling process. Never returns.
    ///
    /// Releases the caller's handles, wakes its parent, hands any children
    /// to the root process (waking the root if one of them is already a
    /// zombie), becomes a zombie and switches into the scheduler for the
    /// last time. The address space and execution context stay with the
    /// zombie until the parent reaps it.
    pub fn exit(&self, cur: Current) -> ! {
        let mut st = self.state.lock();
        let slot = self.current_slot(&st, cur);
        assert!(
            !st.procs.slot(slot).flags.contains(ProcFlags::ROOT),
            "root process exiting"
        );
        let files = core::mem::take(&mut st.procs.slot_mut(slot).files);
        let cwd = st.procs.slot_mut(slot).cwd.take();
        drop(st);

        for h in files {
            self.platform.release_handle(h);
        }
        if let Some(h) = cwd {
            self.platform.release_handle(h);
        }

        let mut st = self.state.lock();

        // The parent may be sleeping in wait().
        if let Some(pslot) = st.procs.slot(slot).parent {
            if st.procs.slot(pslot).is_live() {
                let chan = Channel::proc(st.procs.slot(pslot).pid);
                st.wakeup_all(chan);
            }
        }

        // Hand abandoned children to the root process.
        let root = st.root.expect("exit before bootstrap");
        let mut orphan_zombie = false;
        for i in 0..MAX_PROCESSES {
            let is_child = {
                let p = st.procs.slot(i);
                p.is_live() && p.parent == Some(slot)
            };
            if is_child {
                st.procs.slot_mut(i).parent = Some(root);
                if st.procs.slot(i).state == ProcState::Zombie {
                    orphan_zombie = true;
                }
            }
        }
        if orphan_zombie {
            let chan = Channel::proc(st.procs.slot(root).pid);
            st.wakeup_all(chan);
        }

        let pid = st.procs.slot(slot).pid;
        st.procs.slot_mut(slot).state = ProcState::Zombie;

        // Hand the core back and switch away for good.
        let core = self.running_core(&st, slot);
        st.cpus[core].current = None;
        let save = st.procs.slot(slot).context;
        let resume = st.cpus[core].sched_ctx;
        drop(st);

        log::debug!("pid {} exited", pid);
        self.platform.switch(save, resume);
        panic!("zombie process resumed");
    }

    /// Reap a zombie child: pid only.
    pub fn wait(&self, cur: Current) -> Result<Pid, KernelError> {
        self.reap_child(cur).map(|(pid, _, _)| pid)
    }

    /// Reap a zombie child and report its accumulated running and waiting
    /// (runnable) ticks.
    pub fn waitx(&self, cur: Current) -> Result<(Pid, u64, u64), KernelError> {
        self.reap_child(cur)
    }

    /// The wait loop shared by `wait` and `waitx`: scan for a zombie child,
    /// reap it if found, otherwise sleep on our own identity and rescan on
    /// every wake. Broadcast wakes from unrelated exits are expected; the
    /// rescan handles them.
    fn reap_child(&self, cur: Current) -> Result<(Pid, u64, u64), KernelError> {
        let mut st = self.state.lock();
        let slot = self.current_slot(&st, cur);
        loop {
            let mut have_kids = false;
            let mut zombie = None;
            for i in 0..MAX_PROCESSES {
                let p = st.procs.slot(i);
                if !p.is_live() || p.parent != Some(slot) {
                    continue;
                }
                have_kids = true;
                if p.state == ProcState::Zombie {
                    zombie = Some(i);
                    break;
                }
            }

            if let Some(i) = zombie {
                let (pid, rtime, wtime, ctx, space) = {
                    let p = st.procs.slot_mut(i);
                    (
                        p.pid,
                        p.running_ticks,
                        p.runnable_ticks,
                        p.context,
                        p.space.take(),
                    )
                };
                drop(st);

                // Release what the zombie still owned. The slot is still
                // `Zombie`, so nobody can reallocate it concurrently.
                self.platform.retire(ctx);
                if let Some(space) = space {
                    self.platform.release_space(space);
                }

                let mut st = self.state.lock();
                st.procs.release(i);
                drop(st);
                log::debug!("reaped pid {}", pid);
                return Ok((pid, rtime, wtime));
            }

            if !have_kids || st.procs.slot(slot).flags.contains(ProcFlags::KILLED) {
                return Err(KernelError::NoChildren);
            }

            let me = st.procs.slot(slot).pid;
            st = self.sleep_locked(st, cur, Channel::proc(me));
        }
    }

    /// Arrange for the process with this pid to terminate: set its killed
    /// flag and, if it is sleeping, make it runnable so it observes the
    /// flag promptly. The target self-terminates at its next checkpoint.
    pub fn kill(&self, pid: Pid) -> Result<(), KernelError> {
        let mut st = self.state.lock();
        let slot = st.procs.find(pid).ok_or(KernelError::NoSuchProcess)?;
        let p = st.procs.slot_mut(slot);
        p.flags |= ProcFlags::KILLED;
        if p.state == ProcState::Sleeping {
            p.state = ProcState::Runnable;
        }
        log::debug!("killed pid {}", pid);
        Ok(())
    }

    /// Has the calling process been killed? Checked at cooperative
    /// termination checkpoints.
    pub fn killed(&self, cur: Current) -> bool {
        let st = self.state.lock();
        let slot = self.current_slot(&st, cur);
        st.procs.slot(slot).flags.contains(ProcFlags::KILLED)
    }

    /// Timer hook, invoked once per tick from the interrupt path.
    ///
    /// Advances the global clock, charges one counter to every live process
    /// according to its current state, and broadcast-wakes sleepers on the
    /// tick channel so timed waits have their external wakeup source.
    pub fn tick(&self) {
        let mut st = self.state.lock();
        st.ticks += 1;
        st.procs.tick();
        st.wakeup_all(Channel::TICKS);
    }

    /// The global clock: ticks since bootstrap.
    pub fn uptime(&self) -> u64 {
        self.state.lock().ticks
    }

    /// Current group of the process with this pid.
    pub fn group_of(&self, pid: Pid) -> Result<GroupId, KernelError> {
        let st = self.state.lock();
        let slot = st.procs.find(pid).ok_or(KernelError::NoSuchProcess)?;
        Ok(st.procs.slot(slot).group)
    }

    /// Move the process with this pid into `group`, creating the group on
    /// first reference. Fails if the group table is exhausted or the pid is
    /// not live.
    pub fn set_group(&self, pid: Pid, group: GroupId) -> Result<(), KernelError> {
        let mut st = self.state.lock();
        st.groups.ensure(group)?;
        let slot = st.procs.find(pid).ok_or(KernelError::NoSuchProcess)?;
        st.procs.slot_mut(slot).group = group;
        log::debug!("pid {} moved to group {}", pid, group);
        Ok(())
    }

    /// Grow or shrink the caller's address space. Returns the new size.
    pub fn grow(&self, cur: Current, delta: isize) -> Result<usize, KernelError> {
        let st = self.state.lock();
        let slot = self.current_slot(&st, cur);
        let space = st
            .procs
            .slot(slot)
            .space
            .expect("running process has no address space");
        drop(st);

        let new_size = self.platform.resize_space(space, delta)?;

        let mut st = self.state.lock();
        st.procs.slot_mut(slot).mem_size = new_size;
        Ok(new_size)
    }

    /// Consistent snapshot of every live process, for diagnostics.
    pub fn snapshot(&self) -> Vec<ProcInfo> {
        let st = self.state.lock();
        let mut out = Vec::new();
        for p in st.procs.iter() {
            if !p.is_live() {
                continue;
            }
            let parent = p
                .parent
                .filter(|&ps| st.procs.slot(ps).is_live())
                .map(|ps| st.procs.slot(ps).pid);
            out.push(ProcInfo {
                pid: p.pid,
                name: p.name.clone(),
                state: p.state,
                group: p.group,
                parent,
                running_ticks: p.running_ticks,
                runnable_ticks: p.runnable_ticks,
                sleeping_ticks: p.sleeping_ticks,
            });
        }
        out
    }

    /// Log a process listing.
    pub fn dump(&self) {
        for info in self.snapshot() {
            log::info!(
                "{} {:?} group {} {} r{}/w{}/s{}",
                info.pid,
                info.state,
                info.group,
                info.name,
                info.running_ticks,
                info.runnable_ticks,
                info.sleeping_ticks
            );
        }
    }
}
