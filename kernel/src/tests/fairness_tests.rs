//! Fairness Tests
//!
//! Deterministic dispatch-order and accounting properties on the stub
//! platform: the switch is a no-op, so the test re-queues the chosen
//! process after every round and controls exactly when timer ticks land.

use super::harness::{adopt, park, requeue, stub_kernel, StubPlatform};
use crate::process::group::GroupId;
use crate::process::manager::{KernelError, ProcessManager};
use crate::process::table::Pid;
use crate::scheduler::Dispatched;
use crate::syscall::{sys_getgroup, sys_setgroup};

/// Bootstrap, fork one process per `(group, count)` entry, park the root so
/// only the children compete.
fn setup(groups: &[(u32, usize)]) -> (ProcessManager<StubPlatform>, Vec<(Pid, u32)>) {
    let k = stub_kernel();
    let root = k.bootstrap("init").unwrap();
    let cur = adopt(&k, root, 0);

    let mut pids = Vec::new();
    for &(gid, count) in groups {
        for _ in 0..count {
            let pid = k.spawn(cur).unwrap();
            k.set_group(pid, GroupId(gid)).unwrap();
            pids.push((pid, gid));
        }
    }
    park(&k, root);
    (k, pids)
}

/// One dispatch round: run, charge `ticks` timer ticks during the quantum,
/// re-queue. Returns the pid that ran.
fn round(k: &ProcessManager<StubPlatform>, ticks: u64) -> Pid {
    match k.dispatch(0) {
        Dispatched::Ran(pid) => {
            for _ in 0..ticks {
                k.tick();
            }
            requeue(k, pid);
            pid
        }
        other => panic!("expected a dispatch, got {:?}", other),
    }
}

fn running_ticks(k: &ProcessManager<StubPlatform>, pid: Pid) -> u64 {
    k.snapshot()
        .iter()
        .find(|p| p.pid == pid)
        .map(|p| p.running_ticks)
        .unwrap()
}

// ========================================
// Round robin within a group
// ========================================

#[test]
fn one_group_rotates_through_all_members() {
    let (k, pids) = setup(&[(1, 3)]);
    let members: Vec<Pid> = pids.iter().map(|&(pid, _)| pid).collect();

    let mut seq = Vec::new();
    for _ in 0..9 {
        seq.push(round(&k, 0));
    }

    // The first cycle visits each member exactly once, and the pattern
    // repeats with period three.
    let first: Vec<Pid> = seq[..3].to_vec();
    let mut sorted = first.clone();
    sorted.sort_unstable();
    let mut expected = members.clone();
    expected.sort_unstable();
    assert_eq!(sorted, expected);
    for (i, &pid) in seq.iter().enumerate() {
        assert_eq!(pid, first[i % 3]);
    }
}

// ========================================
// Stride across groups
// ========================================

#[test]
fn two_equal_groups_split_rounds_and_ticks_evenly() {
    let (k, pids) = setup(&[(1, 1), (2, 1)]);
    let (a, b) = (pids[0].0, pids[1].0);

    let mut rounds_a = 0u64;
    let mut rounds_b = 0u64;
    for _ in 0..100 {
        let pid = round(&k, 1);
        if pid == a {
            rounds_a += 1;
        } else {
            rounds_b += 1;
        }
        // With equal strides no group ever lags by more than one round.
        assert!(rounds_a.abs_diff(rounds_b) <= 1);
    }

    assert_eq!(rounds_a, 50);
    assert_eq!(rounds_b, 50);
    // One tick per quantum: the accounting splits 50/50 as well.
    assert_eq!(running_ticks(&k, a), 50);
    assert_eq!(running_ticks(&k, b), 50);
    // The defensive fallback never fires under the lock discipline.
    assert_eq!(k.race_fallbacks(), 0);
}

#[test]
fn groups_get_equal_shares_regardless_of_member_count() {
    let (k, pids) = setup(&[(1, 1), (2, 2)]);
    let solo = pids[0].0;
    let (dup_a, dup_b) = (pids[1].0, pids[2].0);

    let mut counts = std::collections::HashMap::new();
    for _ in 0..100 {
        *counts.entry(round(&k, 1)).or_insert(0u64) += 1;
    }

    // Group 1's single member matches the *combined* rounds of group 2's
    // two members, which split their group's share round-robin.
    assert_eq!(counts[&solo], 50);
    assert_eq!(counts[&dup_a], 25);
    assert_eq!(counts[&dup_b], 25);
    assert_eq!(
        running_ticks(&k, solo),
        running_ticks(&k, dup_a) + running_ticks(&k, dup_b)
    );
}

#[test]
fn a_group_with_no_runnable_members_is_not_charged() {
    let (k, pids) = setup(&[(1, 1), (2, 1)]);
    let (a, b) = (pids[0].0, pids[1].0);

    for _ in 0..10 {
        round(&k, 0);
    }
    // Group 1 goes quiet.
    park(&k, a);
    let pass_before = {
        let st = k.state.lock();
        let slot = st.groups.lookup(GroupId(1)).unwrap();
        st.groups.slot(slot).pass
    };

    for _ in 0..10 {
        assert_eq!(round(&k, 0), b);
    }
    let pass_after = {
        let st = k.state.lock();
        let slot = st.groups.lookup(GroupId(1)).unwrap();
        st.groups.slot(slot).pass
    };
    assert_eq!(pass_before, pass_after);
}

// ========================================
// Group migration
// ========================================

#[test]
fn migration_keeps_old_ticks_and_competes_under_the_new_group() {
    let (k, pids) = setup(&[(1, 1), (2, 1)]);
    let (a, b) = (pids[0].0, pids[1].0);

    for _ in 0..40 {
        round(&k, 1);
    }
    assert_eq!(running_ticks(&k, a), 20);

    // `a` migrates into group 2 while runnable. Nothing is reattributed.
    k.set_group(a, GroupId(2)).unwrap();
    assert_eq!(running_ticks(&k, a), 20);

    // Group 1 is now empty; group 2 round-robins both processes.
    let mut rounds_a = 0u64;
    let mut rounds_b = 0u64;
    for _ in 0..40 {
        let pid = round(&k, 1);
        if pid == a {
            rounds_a += 1;
        } else {
            rounds_b += 1;
        }
    }
    assert_eq!(rounds_a, 20);
    assert_eq!(rounds_b, 20);

    let pass_g1 = {
        let st = k.state.lock();
        let slot = st.groups.lookup(GroupId(1)).unwrap();
        st.groups.slot(slot).pass
    };
    let pass_g1_later = {
        for _ in 0..5 {
            round(&k, 0);
        }
        let st = k.state.lock();
        let slot = st.groups.lookup(GroupId(1)).unwrap();
        st.groups.slot(slot).pass
    };
    assert_eq!(pass_g1, pass_g1_later);
}

// ========================================
// Group assignment surface
// ========================================

#[test]
fn setgroup_rejects_negative_ids_without_touching_state() {
    let k = stub_kernel();
    let root = k.bootstrap("init").unwrap();

    let active_before = {
        let st = k.state.lock();
        (0..crate::config::MAX_GROUPS)
            .filter(|&i| st.groups.slot(i).active)
            .count()
    };

    assert_eq!(sys_setgroup(&k, i64::from(root.0), -1), -1);

    let active_after = {
        let st = k.state.lock();
        (0..crate::config::MAX_GROUPS)
            .filter(|&i| st.groups.slot(i).active)
            .count()
    };
    assert_eq!(active_before, active_after);
    assert_eq!(k.group_of(root), Ok(GroupId::DEFAULT));
}

#[test]
fn setgroup_fails_when_the_group_table_is_exhausted() {
    let k = stub_kernel();
    let root = k.bootstrap("init").unwrap();

    // Ids 1..=15 claim every free slot (0 is the default group).
    for gid in 1..crate::config::MAX_GROUPS as u32 {
        k.set_group(root, GroupId(gid)).unwrap();
    }
    let last = GroupId(crate::config::MAX_GROUPS as u32 - 1);
    assert_eq!(k.group_of(root), Ok(last));

    // A new id has no slot left; the process keeps its group.
    assert_eq!(
        k.set_group(root, GroupId(100)),
        Err(KernelError::OutOfGroups)
    );
    assert_eq!(k.group_of(root), Ok(last));

    // Known ids still work.
    k.set_group(root, GroupId(3)).unwrap();
    assert_eq!(k.group_of(root), Ok(GroupId(3)));
}

#[test]
fn group_queries_on_dead_pids_fail() {
    let k = stub_kernel();
    k.bootstrap("init").unwrap();
    assert_eq!(k.group_of(Pid(4242)), Err(KernelError::NoSuchProcess));
    assert_eq!(sys_getgroup(&k, 4242), -1);
    assert_eq!(sys_setgroup(&k, 4242, 1), -1);
}
