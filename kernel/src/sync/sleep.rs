//! Sleep / wakeup.
//!
//! A process blocks on an opaque [`Channel`]; a wakeup on the same channel
//! is a broadcast that makes every matching sleeper runnable. Woken
//! processes must re-validate their condition — `sleep_on` is only correct
//! inside a loop.
//!
//! The lost-wakeup race is closed by lock ordering: the scheduler lock is
//! acquired *before* the caller's condition lock is released, and wakeups
//! require the scheduler lock. No wakeup can therefore land between the
//! caller's last condition check and the transition to `Sleeping`.

use spin::{Mutex, MutexGuard};

use crate::config::MAX_PROCESSES;
use crate::platform::Platform;
use crate::process::manager::{Current, KernelError, ProcessManager, SchedState};
use crate::process::table::{ProcFlags, ProcState};
use crate::process::Pid;

/// An opaque value matching a sleeper with its waker: any distinguishing
/// identity for "the thing being waited for".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Channel(pub u64);

impl Channel {
    /// The well-known channel the timer hook broadcasts on every tick;
    /// the external wakeup source for timed waits.
    pub const TICKS: Channel = Channel(1);

    /// The channel identifying one process (used by `wait`: a parent
    /// sleeps on its own identity, exiting children wake it).
    pub fn proc(pid: Pid) -> Channel {
        Channel(0x8000_0000_0000_0000 | u64::from(pid.0))
    }
}

impl SchedState {
    /// Make every process sleeping on `chan` runnable. Callers hold the
    /// scheduler lock by construction.
    pub(crate) fn wakeup_all(&mut self, chan: Channel) {
        for i in 0..MAX_PROCESSES {
            let p = self.procs.slot_mut(i);
            if p.state == ProcState::Sleeping && p.chan == Some(chan) {
                p.state = ProcState::Runnable;
            }
        }
    }
}

impl<P: Platform> ProcessManager<P> {
    /// Wake all sleepers on `chan`.
    pub fn wakeup(&self, chan: Channel) {
        self.state.lock().wakeup_all(chan);
    }

    /// Sleep on `chan`, atomically releasing `guard`.
    ///
    /// The caller must hold `guard` (taken from `lock`) protecting the
    /// condition it just found false. On return the condition lock has been
    /// reacquired; the caller re-checks the condition and loops:
    ///
    /// ```ignore
    /// let mut held = cond_lock.lock();
    /// while !*held {
    ///     held = kernel.sleep_on(cur, chan, &cond_lock, held);
    /// }
    /// ```
    pub fn sleep_on<'a, T>(
        &self,
        cur: Current,
        chan: Channel,
        lock: &'a Mutex<T>,
        guard: MutexGuard<'a, T>,
    ) -> MutexGuard<'a, T> {
        // Scheduler lock first; only then is dropping the condition lock
        // safe, because delivering a wakeup needs the scheduler lock too.
        let st = self.state.lock();
        drop(guard);
        let st = self.sleep_locked(st, cur, chan);
        drop(st);
        lock.lock()
    }

    /// The core of every blocking path: transition to `Sleeping` on `chan`
    /// and hand the core back, all while the scheduler lock is held by the
    /// caller. Returns with the lock re-taken and the channel cleared, after
    /// a wakeup (or forced wake) got this process dispatched again.
    pub(crate) fn sleep_locked<'a>(
        &'a self,
        mut st: MutexGuard<'a, SchedState>,
        cur: Current,
        chan: Channel,
    ) -> MutexGuard<'a, SchedState> {
        let slot = self.current_slot(&st, cur);
        let core = self.running_core(&st, slot);
        {
            let p = st.procs.slot_mut(slot);
            p.chan = Some(chan);
            p.state = ProcState::Sleeping;
        }
        st.cpus[core].current = None;
        let save = st.procs.slot(slot).context;
        let resume = st.cpus[core].sched_ctx;
        drop(st);

        self.platform.switch(save, resume);

        let mut st = self.state.lock();
        st.procs.slot_mut(slot).chan = None;
        st
    }

    /// Block the caller for at least `n` ticks of the global clock.
    ///
    /// Returns `Err(Killed)` without waiting out the remainder if the
    /// process is killed while blocked.
    pub fn sleep_ticks(&self, cur: Current, n: u64) -> Result<(), KernelError> {
        let mut st = self.state.lock();
        let slot = self.current_slot(&st, cur);
        let start = st.ticks;
        while st.ticks.wrapping_sub(start) < n {
            if st.procs.slot(slot).flags.contains(ProcFlags::KILLED) {
                return Err(KernelError::Killed);
            }
            st = self.sleep_locked(st, cur, Channel::TICKS);
        }
        Ok(())
    }
}
