//! Per-core scheduler loop.
//!
//! Each core runs [`ProcessManager::run`] forever: pick the group with the
//! least virtual time, pick the next process in it round-robin, switch into
//! it, and charge the group one stride when the process hands the core
//! back. The selection critical section (group pick, process pick, marking
//! the process `Running`, binding it to the core) is atomic under the one
//! scheduler lock; the lock is dropped across the opaque context switch and
//! re-taken for the epilogue, so no core ever spins on the lock for the
//! length of another core's quantum.

use crate::platform::Platform;
use crate::process::manager::{Current, ProcessManager};
use crate::process::table::{Pid, ProcState};

/// Outcome of a single dispatch round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// A process ran and handed the core back.
    Ran(Pid),
    /// Nothing was runnable anywhere; the idle hook ran.
    Idle,
    /// A group reported runnable work but the rotating scan found none.
    /// Benign: the round is retried. Counted, because under the lock
    /// discipline the two checks must agree.
    Raced,
}

impl<P: Platform> ProcessManager<P> {
    /// Run this core's scheduler loop forever. Call once per core after the
    /// core has finished its own initialization.
    pub fn run(&self, core: usize) -> ! {
        loop {
            self.dispatch(core);
        }
    }

    /// One dispatch round for `core`.
    ///
    /// Returns when the dispatched process yields, blocks or terminates
    /// back to this core — or immediately, if there was nothing to run.
    pub fn dispatch(&self, core: usize) -> Dispatched {
        let mut st = self.state.lock();
        let state = &mut *st;

        let Some(gslot) = state.groups.pick_group(&state.procs) else {
            drop(st);
            self.platform.idle(core);
            return Dispatched::Idle;
        };
        let Some(slot) = state.groups.pick_process(gslot, &state.procs) else {
            state.race_fallbacks += 1;
            let id = state.groups.slot(gslot).id;
            drop(st);
            log::warn!(
                "group {} reported runnable work but the rotation found none",
                id
            );
            return Dispatched::Raced;
        };

        let pid = {
            let p = state.procs.slot_mut(slot);
            p.state = ProcState::Running;
            p.pid
        };
        state.cpus[core].current = Some(slot);
        state.sched_rounds += 1;
        let save = state.cpus[core].sched_ctx;
        let resume = state.procs.slot(slot).context;
        drop(st);

        log::trace!("core {} dispatching pid {}", core, pid);
        self.platform.switch(save, resume);

        // The process yielded, blocked or exited back to this core. It
        // already unbound itself when it handed the core back; clearing
        // again here is idempotent and keeps the slot clean even when the
        // switch primitive returns without a yield transition.
        let mut st = self.state.lock();
        st.cpus[core].current = None;
        st.groups.advance(gslot);
        Dispatched::Ran(pid)
    }

    /// Give up the CPU for one scheduling round. This is also the
    /// preemption entry point: the external timer interrupt calls it on
    /// behalf of the running process.
    pub fn yield_now(&self, cur: Current) {
        let mut st = self.state.lock();
        let slot = self.current_slot(&st, cur);
        let core = self.running_core(&st, slot);
        st.procs.slot_mut(slot).state = ProcState::Runnable;
        st.cpus[core].current = None;
        let save = st.procs.slot(slot).context;
        let resume = st.cpus[core].sched_ctx;
        drop(st);

        self.platform.switch(save, resume);
        // Dispatched again; back to the caller's quantum.
    }

    /// Completed dispatch rounds across all cores.
    pub fn sched_rounds(&self) -> u64 {
        self.state.lock().sched_rounds
    }

    /// How often a group claimed runnable work the rotation could not find.
    pub fn race_fallbacks(&self) -> u64 {
        self.state.lock().race_fallbacks
    }
}
