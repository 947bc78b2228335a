//! Pool and pool-manager configuration

use crate::error::{MemoryError, MemoryResult};

/// Pattern written over freed ranges in debug configurations
pub const DEBUG_FREE_PATTERN: u8 = 0xDD;

/// Configuration for a single [`Pool`](crate::pool::Pool)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Slot-table size at creation
    pub initial_slots: usize,

    /// Upper bound for slot-table growth
    pub max_slots: usize,

    /// Compact the pool and retry once when a request fails only because
    /// free space is scattered. Off by default: callers compact explicitly
    /// with [`Pool::defragment`](crate::pool::Pool::defragment) or ask for it
    /// per request through `allocate_with`.
    pub compact_on_failure: bool,

    /// Fill pattern for freed ranges (only applied while the pool is mapped)
    pub free_pattern: Option<u8>,

    /// Enable statistics counters
    pub track_stats: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            initial_slots: 64,
            max_slots: 64 * 1024,
            compact_on_failure: false,
            free_pattern: if cfg!(debug_assertions) {
                Some(DEBUG_FREE_PATTERN)
            } else {
                None
            },
            track_stats: cfg!(debug_assertions),
        }
    }
}

impl PoolConfig {
    /// Production configuration - no hygiene fills, no counters
    #[must_use]
    pub fn production() -> Self {
        Self {
            free_pattern: None,
            track_stats: false,
            ..Self::default()
        }
    }

    /// Debug configuration - freed ranges are poisoned, counters on,
    /// implicit compaction on failure
    #[must_use]
    pub fn debug() -> Self {
        Self {
            compact_on_failure: true,
            free_pattern: Some(DEBUG_FREE_PATTERN),
            track_stats: true,
            ..Self::default()
        }
    }

    /// Performance configuration - no hygiene fills, no counters, larger
    /// starting slot table
    #[must_use]
    pub fn performance() -> Self {
        Self {
            initial_slots: 1024,
            free_pattern: None,
            track_stats: false,
            ..Self::default()
        }
    }

    /// Set the initial slot-table size
    #[must_use]
    pub fn with_initial_slots(mut self, slots: usize) -> Self {
        self.initial_slots = slots;
        self.max_slots = self.max_slots.max(slots);
        self
    }

    /// Compact and retry once when scattered free space fails a request
    #[must_use]
    pub fn with_compact_on_failure(mut self, enabled: bool) -> Self {
        self.compact_on_failure = enabled;
        self
    }

    /// Set the slot-table growth limit
    #[must_use]
    pub fn with_max_slots(mut self, slots: usize) -> Self {
        self.max_slots = slots;
        self
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> MemoryResult<()> {
        if self.initial_slots == 0 {
            return Err(MemoryError::invalid_pool_config(
                "initial_slots must be non-zero",
            ));
        }
        if self.max_slots < self.initial_slots {
            return Err(MemoryError::invalid_pool_config(
                "max_slots must be at least initial_slots",
            ));
        }
        if u32::try_from(self.max_slots).map_or(true, |slots| slots == u32::MAX) {
            return Err(MemoryError::invalid_pool_config(
                "max_slots must fit below the invalid slot sentinel",
            ));
        }
        Ok(())
    }
}

/// Configuration for a [`PoolManager`](crate::manager::PoolManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Capacity of every pool the manager creates
    pub pool_capacity: usize,

    /// Maximum number of pools alive at once
    pub max_pools: usize,

    /// Configuration applied to every created pool
    pub pool: PoolConfig,

    /// Drop pools that become empty, as long as another pool remains
    pub release_empty_pools: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 1024 * 1024,
            max_pools: 16,
            pool: PoolConfig::default(),
            release_empty_pools: true,
        }
    }
}

impl ManagerConfig {
    /// Manager creating pools of `pool_capacity` bytes, at most `max_pools`
    #[must_use]
    pub fn new(pool_capacity: usize, max_pools: usize) -> Self {
        Self {
            pool_capacity,
            max_pools,
            ..Self::default()
        }
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> MemoryResult<()> {
        if self.pool_capacity == 0 {
            return Err(MemoryError::invalid_config("pool_capacity must be non-zero"));
        }
        if self.max_pools == 0 {
            return Err(MemoryError::invalid_config("max_pools must be non-zero"));
        }
        self.pool.validate()
    }
}
