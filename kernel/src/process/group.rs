//! Fairness Groups
//!
//! The group table and the two-level selection policy: stride scheduling
//! picks a group (lowest cumulative `pass` among groups with runnable work,
//! ties broken by lowest id so selection is reproducible), then a rotating
//! round-robin cursor picks a process inside it.
//!
//! Groups are created lazily the first time a process names an unseen id and
//! are never reclaimed; the table is a hard, fixed-capacity resource.

use crate::config::{DEFAULT_GROUP, MAX_GROUPS, MAX_PROCESSES, STRIDE_UNIT};
use crate::process::manager::KernelError;
use crate::process::table::{ProcState, ProcessTable};

/// Fairness-group ID type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub u32);

impl GroupId {
    /// The default group every process starts in.
    pub const DEFAULT: GroupId = GroupId(DEFAULT_GROUP);
}

impl core::fmt::Display for GroupId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-group fairness accounting.
#[derive(Debug, Clone, Copy)]
pub struct Group {
    /// Logical group id; meaningful only while `active`.
    pub id: GroupId,
    /// Slot has been claimed. Never cleared.
    pub active: bool,
    /// Cumulative virtual time; monotonically non-decreasing.
    pub pass: u64,
    /// Virtual-time cost per dispatch round (`STRIDE_UNIT / share`; every
    /// group is installed with share = 1).
    pub stride: u64,
    /// Rotation position for round-robin selection, persisted across
    /// scheduling rounds.
    pub rr_cursor: usize,
}

impl Group {
    fn empty() -> Self {
        Group {
            id: GroupId(0),
            active: false,
            pass: 0,
            stride: STRIDE_UNIT,
            rr_cursor: 0,
        }
    }
}

/// The group table.
pub struct GroupTable {
    slots: [Group; MAX_GROUPS],
}

impl GroupTable {
    /// Create the table with the default group pre-activated.
    pub fn new() -> Self {
        let mut table = GroupTable {
            slots: [Group::empty(); MAX_GROUPS],
        };
        table.slots[0] = Group {
            id: GroupId::DEFAULT,
            active: true,
            pass: 0,
            stride: STRIDE_UNIT,
            rr_cursor: 0,
        };
        table
    }

    /// Find the slot of the active group with this id.
    pub fn lookup(&self, id: GroupId) -> Option<usize> {
        self.slots
            .iter()
            .position(|g| g.active && g.id == id)
    }

    /// Return the active group with this id, claiming a free slot for it if
    /// the id has not been seen before.
    pub fn ensure(&mut self, id: GroupId) -> Result<usize, KernelError> {
        if let Some(slot) = self.lookup(id) {
            return Ok(slot);
        }
        let slot = self
            .slots
            .iter()
            .position(|g| !g.active)
            .ok_or(KernelError::OutOfGroups)?;
        self.slots[slot] = Group {
            id,
            active: true,
            pass: 0,
            stride: STRIDE_UNIT,
            rr_cursor: 0,
        };
        log::debug!("created group {}", id);
        Ok(slot)
    }

    /// Borrow a group slot.
    pub fn slot(&self, slot: usize) -> &Group {
        &self.slots[slot]
    }

    /// True iff at least one process in this group is `Runnable`.
    pub fn has_runnable(&self, id: GroupId, procs: &ProcessTable) -> bool {
        procs
            .iter()
            .any(|p| p.state == ProcState::Runnable && p.group == id)
    }

    /// Select the group to dispatch from: lowest `pass` among active groups
    /// with runnable work, ties broken by lowest id. `None` when nothing is
    /// runnable anywhere.
    pub fn pick_group(&self, procs: &ProcessTable) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (slot, g) in self.slots.iter().enumerate() {
            if !g.active || !self.has_runnable(g.id, procs) {
                continue;
            }
            best = match best {
                None => Some(slot),
                Some(b) => {
                    let cur = &self.slots[b];
                    if g.pass < cur.pass || (g.pass == cur.pass && g.id < cur.id) {
                        Some(slot)
                    } else {
                        Some(b)
                    }
                }
            };
        }
        best
    }

    /// Round-robin within the group: one rotating scan of the process table
    /// starting at `rr_cursor`, wrapping once. On a hit the cursor moves to
    /// the index after the chosen process so the next selection continues
    /// from there. `None` if the scan finds no runnable member.
    pub fn pick_process(&mut self, gslot: usize, procs: &ProcessTable) -> Option<usize> {
        let id = self.slots[gslot].id;
        let start = self.slots[gslot].rr_cursor % MAX_PROCESSES;
        for step in 0..MAX_PROCESSES {
            let slot = (start + step) % MAX_PROCESSES;
            let p = procs.slot(slot);
            if p.state == ProcState::Runnable && p.group == id {
                self.slots[gslot].rr_cursor = (slot + 1) % MAX_PROCESSES;
                return Some(slot);
            }
        }
        None
    }

    /// Charge the group one dispatch round.
    pub fn advance(&mut self, gslot: usize) {
        let g = &mut self.slots[gslot];
        g.pass += g.stride;
    }
}

impl Default for GroupTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runnable(procs: &mut ProcessTable, group: GroupId) -> usize {
        let slot = procs.allocate().unwrap();
        procs.slot_mut(slot).state = ProcState::Runnable;
        procs.slot_mut(slot).group = group;
        slot
    }

    #[test]
    fn default_group_is_preactivated() {
        let groups = GroupTable::new();
        assert_eq!(groups.lookup(GroupId::DEFAULT), Some(0));
    }

    #[test]
    fn ensure_is_idempotent() {
        let mut groups = GroupTable::new();
        let a = groups.ensure(GroupId(7)).unwrap();
        let b = groups.ensure(GroupId(7)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn ensure_fails_once_all_slots_are_claimed() {
        let mut groups = GroupTable::new();
        // Slot 0 holds the default group; 15 more ids fill the table.
        for id in 1..MAX_GROUPS as u32 {
            groups.ensure(GroupId(id)).unwrap();
        }
        assert!(matches!(
            groups.ensure(GroupId(99)),
            Err(KernelError::OutOfGroups)
        ));
        // Known ids still resolve after exhaustion.
        assert!(groups.ensure(GroupId(3)).is_ok());
    }

    #[test]
    fn pick_group_returns_none_without_runnable_work() {
        let mut groups = GroupTable::new();
        let procs = ProcessTable::new();
        groups.ensure(GroupId(1)).unwrap();
        assert_eq!(groups.pick_group(&procs), None);
    }

    #[test]
    fn pick_group_takes_lowest_pass_and_breaks_ties_by_id() {
        let mut groups = GroupTable::new();
        let mut procs = ProcessTable::new();
        let g1 = groups.ensure(GroupId(1)).unwrap();
        let g2 = groups.ensure(GroupId(2)).unwrap();
        runnable(&mut procs, GroupId(1));
        runnable(&mut procs, GroupId(2));

        // Equal pass: the lower id wins.
        assert_eq!(groups.pick_group(&procs), Some(g1));

        groups.advance(g1);
        assert_eq!(groups.pick_group(&procs), Some(g2));
    }

    #[test]
    fn pick_group_skips_groups_without_runnable_members() {
        let mut groups = GroupTable::new();
        let mut procs = ProcessTable::new();
        groups.ensure(GroupId(1)).unwrap();
        let g2 = groups.ensure(GroupId(2)).unwrap();
        let sleeper = runnable(&mut procs, GroupId(1));
        procs.slot_mut(sleeper).state = ProcState::Sleeping;
        runnable(&mut procs, GroupId(2));

        assert_eq!(groups.pick_group(&procs), Some(g2));
    }

    #[test]
    fn round_robin_visits_each_member_once_per_rotation() {
        let mut groups = GroupTable::new();
        let mut procs = ProcessTable::new();
        let a = runnable(&mut procs, GroupId::DEFAULT);
        let b = runnable(&mut procs, GroupId::DEFAULT);
        let c = runnable(&mut procs, GroupId::DEFAULT);

        let mut order = Vec::new();
        for _ in 0..6 {
            order.push(groups.pick_process(0, &procs).unwrap());
        }
        assert_eq!(order, vec![a, b, c, a, b, c]);
    }

    #[test]
    fn rr_cursor_persists_across_state_changes() {
        let mut groups = GroupTable::new();
        let mut procs = ProcessTable::new();
        let a = runnable(&mut procs, GroupId::DEFAULT);
        let b = runnable(&mut procs, GroupId::DEFAULT);

        assert_eq!(groups.pick_process(0, &procs), Some(a));
        // `a` runs; the cursor is already past it, so `b` is next even
        // though `a` went runnable again.
        assert_eq!(groups.pick_process(0, &procs), Some(b));
        assert_eq!(groups.pick_process(0, &procs), Some(a));
    }

    #[test]
    fn pick_process_returns_none_for_an_empty_group() {
        let mut groups = GroupTable::new();
        let procs = ProcessTable::new();
        let g1 = groups.ensure(GroupId(1)).unwrap();
        assert_eq!(groups.pick_process(g1, &procs), None);
    }
}
