//! System-call surface.
//!
//! Thin raw-integer wrappers over the typed manager API: the shape the trap
//! layer of an embedding kernel dispatches into. Failures collapse to `-1`,
//! success values are non-negative — pids, group ids, the clock. Nothing
//! here takes the scheduler lock itself; each wrapper is a single manager
//! call plus argument validation.

use crate::platform::Platform;
use crate::process::group::GroupId;
use crate::process::manager::{Current, ProcessManager};
use crate::process::table::Pid;

// ==========================================
// Process lifecycle
// ==========================================

/// Fork the calling process. Returns the child pid, or -1 on resource
/// exhaustion.
pub fn sys_spawn<P: Platform>(k: &ProcessManager<P>, cur: Current) -> i64 {
    match k.spawn(cur) {
        Ok(pid) => i64::from(pid.0),
        Err(_) => -1,
    }
}

/// Terminate the calling process. Never returns.
pub fn sys_exit<P: Platform>(k: &ProcessManager<P>, cur: Current) -> ! {
    k.exit(cur)
}

/// Reap a zombie child. Returns its pid, or -1 if the caller has no
/// children.
pub fn sys_wait<P: Platform>(k: &ProcessManager<P>, cur: Current) -> i64 {
    match k.wait(cur) {
        Ok(pid) => i64::from(pid.0),
        Err(_) => -1,
    }
}

/// Reap a zombie child and report its accumulated running and waiting
/// ticks through the out parameters. Returns its pid, or -1 if the caller
/// has no children (the out parameters are untouched then).
pub fn sys_waitx<P: Platform>(
    k: &ProcessManager<P>,
    cur: Current,
    wtime: &mut i64,
    rtime: &mut i64,
) -> i64 {
    match k.waitx(cur) {
        Ok((pid, running, runnable)) => {
            *rtime = running as i64;
            *wtime = runnable as i64;
            i64::from(pid.0)
        }
        Err(_) => -1,
    }
}

/// Set the killed flag on a process. Returns 0, or -1 if the pid does not
/// name a live process.
pub fn sys_kill<P: Platform>(k: &ProcessManager<P>, pid: i64) -> i64 {
    let Ok(pid) = u32::try_from(pid) else {
        return -1;
    };
    match k.kill(Pid(pid)) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

// ==========================================
// Fairness groups
// ==========================================

/// Current group id of a process, or -1 if the pid is not live.
pub fn sys_getgroup<P: Platform>(k: &ProcessManager<P>, pid: i64) -> i64 {
    let Ok(pid) = u32::try_from(pid) else {
        return -1;
    };
    match k.group_of(Pid(pid)) {
        Ok(group) => i64::from(group.0),
        Err(_) => -1,
    }
}

/// Move a process into a group (creating it on first reference). Returns
/// 0, or -1 if the group id is negative, the group table is exhausted, or
/// the pid is not live. A negative id is rejected before any table is
/// touched.
pub fn sys_setgroup<P: Platform>(k: &ProcessManager<P>, pid: i64, gid: i64) -> i64 {
    let Ok(gid) = u32::try_from(gid) else {
        return -1;
    };
    let Ok(pid) = u32::try_from(pid) else {
        return -1;
    };
    match k.set_group(Pid(pid), GroupId(gid)) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

// ==========================================
// Time and memory
// ==========================================

/// Yield the CPU for one scheduling round.
pub fn sys_yield<P: Platform>(k: &ProcessManager<P>, cur: Current) -> i64 {
    k.yield_now(cur);
    0
}

/// Block for at least `n` ticks. Returns 0, or -1 if killed while waiting
/// (or `n` is negative).
pub fn sys_sleep<P: Platform>(k: &ProcessManager<P>, cur: Current, n: i64) -> i64 {
    let Ok(n) = u64::try_from(n) else {
        return -1;
    };
    match k.sleep_ticks(cur, n) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Ticks since bootstrap.
pub fn sys_uptime<P: Platform>(k: &ProcessManager<P>) -> i64 {
    k.uptime() as i64
}

/// Grow or shrink the caller's address space by `delta` bytes. Returns 0,
/// or -1 on failure.
pub fn sys_grow<P: Platform>(k: &ProcessManager<P>, cur: Current, delta: i64) -> i64 {
    match k.grow(cur, delta as isize) {
        Ok(_) => 0,
        Err(_) => -1,
    }
}
