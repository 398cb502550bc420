//! Kernel configuration constants.
//!
//! Compile-time limits and tuning values for the scheduling core. Both
//! tables are fixed-capacity arenas; exhausting them is reported to callers
//! as an error, never grown past.

/// Maximum number of processes (process-table capacity).
pub const MAX_PROCESSES: usize = 64;

/// Maximum number of fairness groups (group-table capacity).
///
/// Group slots are never reclaimed once allocated, so this also bounds the
/// number of distinct group ids the system will ever accept.
pub const MAX_GROUPS: usize = 16;

/// Maximum number of CPUs running scheduler loops.
pub const MAX_CPUS: usize = 8;

/// Virtual-time cost charged to a group per completed dispatch round.
///
/// Every group is installed with this stride (share = 1). The field is
/// per-group so differentiated shares (stride = unit / share) remain
/// possible without reshaping the tables.
pub const STRIDE_UNIT: u64 = 100_000;

/// Group id every new process starts in.
pub const DEFAULT_GROUP: u32 = 0;
