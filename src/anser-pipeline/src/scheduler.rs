//! Group scheduler: batch sizing and the memory budget.
//!
//! Rows-per-group starts from the host memory table and only ever shrinks.
//! A stage that blows its budget halves the group size and retries the
//! batch; at the floor the run fails with `OutOfMemory`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common_error::{AnserError, AnserResult};

/// One gibibyte.
const GIB: u64 = 1024 * 1024 * 1024;

/// Smallest permitted rows-per-group.
pub const GROUP_FLOOR: usize = 10_000;

/// Rows-per-group by total system memory.
const MEMORY_TABLE: &[(u64, usize)] = &[
    (0, 100_000),
    (8, 500_000),
    (16, 1_000_000),
    (24, 5_000_000),
];

/// Pick rows-per-group from total system memory in bytes.
pub fn rows_per_group_for_memory(total_bytes: u64) -> usize {
    let mut rows = MEMORY_TABLE[0].1;
    for &(threshold_gib, table_rows) in MEMORY_TABLE {
        if total_bytes >= threshold_gib * GIB {
            rows = table_rows;
        } else {
            break;
        }
    }
    rows
}

/// Observe the host and pick rows-per-group.
pub fn detect_rows_per_group() -> usize {
    use sysinfo::System;
    let mut system = System::new();
    system.refresh_memory();
    rows_per_group_for_memory(system.total_memory())
}

/// Headroom left to the OS and the decoder, in bytes.
const BUDGET_HEADROOM: u64 = GIB;

/// Byte budget for in-flight group state, given the memory to divide up.
///
/// Large hosts keep one gibibyte of headroom; small hosts keep five
/// percent. Exceeding the budget is the out-of-memory condition that
/// triggers the halve-and-retry path.
pub fn memory_budget_for(bytes: u64) -> usize {
    let five_percent = bytes / 20;
    let budget = if five_percent > BUDGET_HEADROOM {
        bytes - BUDGET_HEADROOM
    } else {
        bytes - five_percent
    };
    usize::try_from(budget).unwrap_or(usize::MAX)
}

/// Observe the host and pick the byte budget from available memory
/// (falling back to total memory when availability is unknown).
pub fn detect_memory_budget() -> usize {
    use sysinfo::System;
    let mut system = System::new();
    system.refresh_memory();
    let available = system.available_memory();
    let base = if available > 0 {
        available
    } else {
        system.total_memory()
    };
    memory_budget_for(base)
}

/// Memory budget for in-flight group state.
///
/// Accounting only; reservations are estimates made by stages before they
/// materialize a batch. Limit 0 means unlimited.
#[derive(Debug, Default)]
pub struct MemoryBudget {
    used: AtomicUsize,
    limit: usize,
}

impl MemoryBudget {
    /// Create a budget with a byte limit (0 = unlimited).
    pub fn new(limit: usize) -> Self {
        Self {
            used: AtomicUsize::new(0),
            limit,
        }
    }

    /// Currently reserved bytes.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::SeqCst)
    }

    /// Budget limit in bytes (0 = unlimited).
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Try to reserve bytes; `false` when the budget would be exceeded.
    fn try_reserve(&self, bytes: usize) -> bool {
        if bytes == 0 {
            return true;
        }
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_add(bytes);
            if self.limit > 0 && next > self.limit {
                return false;
            }
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, bytes: usize) {
        if bytes == 0 {
            return;
        }
        let mut current = self.used.load(Ordering::Relaxed);
        loop {
            let next = current.saturating_sub(bytes);
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

/// RAII reservation against a [`MemoryBudget`].
pub struct Reservation {
    budget: Arc<MemoryBudget>,
    bytes: usize,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}

/// Stage batch sizing with adaptive down-scaling.
#[derive(Debug)]
pub struct GroupScheduler {
    rows_per_group: AtomicUsize,
    budget: Arc<MemoryBudget>,
}

impl GroupScheduler {
    /// Create a scheduler with an explicit rows-per-group and no memory
    /// limit.
    pub fn new(rows_per_group: usize) -> Self {
        Self::with_budget(rows_per_group, 0)
    }

    /// Create a scheduler with a memory limit in bytes (0 = unlimited).
    pub fn with_budget(rows_per_group: usize, limit_bytes: usize) -> Self {
        Self {
            rows_per_group: AtomicUsize::new(rows_per_group.max(1)),
            budget: Arc::new(MemoryBudget::new(limit_bytes)),
        }
    }

    /// Scheduler sized from the host, honoring a caller override for the
    /// rows-per-group; the byte budget always comes from observed memory.
    pub fn auto(rows_override: Option<usize>) -> Self {
        Self::with_budget(
            rows_override.unwrap_or_else(detect_rows_per_group),
            detect_memory_budget(),
        )
    }

    /// Current rows-per-group.
    pub fn rows_per_group(&self) -> usize {
        self.rows_per_group.load(Ordering::SeqCst)
    }

    /// Try to reserve working-set bytes for a batch.
    pub fn try_reserve(&self, bytes: usize) -> Option<Reservation> {
        if self.budget.try_reserve(bytes) {
            Some(Reservation {
                budget: Arc::clone(&self.budget),
                bytes,
            })
        } else {
            None
        }
    }

    /// Halve rows-per-group after a memory condition.
    ///
    /// Returns the new value, or `OutOfMemory` once the floor is reached.
    pub fn downscale(&self) -> AnserResult<usize> {
        let mut current = self.rows_per_group.load(Ordering::SeqCst);
        loop {
            if current <= GROUP_FLOOR {
                return Err(AnserError::out_of_memory(format!(
                    "group scheduler reached its floor of {GROUP_FLOOR} rows"
                )));
            }
            let next = (current / 2).max(GROUP_FLOOR);
            match self.rows_per_group.compare_exchange(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    tracing::warn!(rows_per_group = next, "memory pressure, halving group size");
                    return Ok(next);
                }
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_table() {
        assert_eq!(rows_per_group_for_memory(4 * GIB), 100_000);
        assert_eq!(rows_per_group_for_memory(8 * GIB), 500_000);
        assert_eq!(rows_per_group_for_memory(12 * GIB), 500_000);
        assert_eq!(rows_per_group_for_memory(16 * GIB), 1_000_000);
        assert_eq!(rows_per_group_for_memory(32 * GIB), 5_000_000);
    }

    #[test]
    fn test_memory_budget_sizing() {
        // Small host: five percent headroom.
        let small = 4 * GIB;
        assert_eq!(memory_budget_for(small), (small - small / 20) as usize);
        // Large host: one gibibyte headroom.
        assert_eq!(memory_budget_for(64 * GIB), (63 * GIB) as usize);
        // The budget is always below what was observed.
        assert!(memory_budget_for(2 * GIB) < (2 * GIB) as usize);
    }

    #[test]
    fn test_downscale_halves_to_floor() {
        let scheduler = GroupScheduler::new(100_000);
        assert_eq!(scheduler.downscale().unwrap(), 50_000);
        assert_eq!(scheduler.downscale().unwrap(), 25_000);
        assert_eq!(scheduler.downscale().unwrap(), 12_500);
        assert_eq!(scheduler.downscale().unwrap(), 10_000);
        let err = scheduler.downscale().unwrap_err();
        assert!(matches!(err, AnserError::OutOfMemory(_)));
    }

    #[test]
    fn test_budget_reservation() {
        let scheduler = GroupScheduler::with_budget(100_000, 1000);
        let reservation = scheduler.try_reserve(600).expect("fits");
        assert!(scheduler.try_reserve(600).is_none());
        drop(reservation);
        assert!(scheduler.try_reserve(600).is_some());
    }

    #[test]
    fn test_unlimited_budget() {
        let scheduler = GroupScheduler::new(100_000);
        assert!(scheduler.try_reserve(usize::MAX / 2).is_some());
    }
}
