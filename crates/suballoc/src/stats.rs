//! Statistics snapshots for pools and the pool manager

/// Running counters kept by a pool when `track_stats` is enabled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Counters {
    pub(crate) allocations: u64,
    pub(crate) failed_allocations: u64,
    pub(crate) frees: u64,
    pub(crate) compactions: u64,
    pub(crate) entries_relocated: u64,
    pub(crate) bytes_relocated: u64,
}

/// Point-in-time statistics for a single pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total addressable bytes
    pub capacity: usize,
    /// Bytes held by live entries
    pub used_bytes: usize,
    /// Bytes not held by any entry
    pub free_bytes: usize,
    /// Number of live entries
    pub live_entries: usize,
    /// Current slot-table size
    pub slot_capacity: usize,
    /// Largest single free gap in bytes
    pub largest_gap: usize,
    /// Whether holes exist before the last live entry
    pub fragmented: bool,
    /// Successful allocations (0 unless tracking)
    pub allocations: u64,
    /// Allocation requests that returned nothing (0 unless tracking)
    pub failed_allocations: u64,
    /// Entries freed (0 unless tracking)
    pub frees: u64,
    /// Compaction passes that ran (0 unless tracking)
    pub compactions: u64,
    /// Entries moved by compaction or transfer (0 unless tracking)
    pub entries_relocated: u64,
    /// Bytes copied by compaction or transfer (0 unless tracking)
    pub bytes_relocated: u64,
}

impl PoolStats {
    /// Share of free space that is unusable for a single request of the
    /// largest possible size. `0.0` means every free byte is contiguous.
    pub fn fragmentation(&self) -> f64 {
        if self.free_bytes == 0 {
            return 0.0;
        }
        1.0 - self.largest_gap as f64 / self.free_bytes as f64
    }

    /// Used share of the capacity, `0.0..=1.0`
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.capacity as f64
    }
}

/// Aggregate statistics across every pool of a manager
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Pools currently alive
    pub pools: usize,
    /// Sum of pool capacities
    pub total_capacity: usize,
    /// Bytes held by live entries across all pools
    pub used_bytes: usize,
    /// Live entries across all pools
    pub live_entries: usize,
    /// Pools currently flagged as fragmented
    pub fragmented_pools: usize,
}

impl ManagerStats {
    pub(crate) fn record(&mut self, pool: &PoolStats) {
        self.pools += 1;
        self.total_capacity += pool.capacity;
        self.used_bytes += pool.used_bytes;
        self.live_entries += pool.live_entries;
        if pool.fragmented {
            self.fragmented_pools += 1;
        }
    }

    /// Bytes not held by any entry across all pools
    pub fn free_bytes(&self) -> usize {
        self.total_capacity - self.used_bytes
    }
}
