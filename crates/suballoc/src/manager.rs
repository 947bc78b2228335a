//! Pool-of-pools orchestration
//!
//! [`PoolManager`] owns a set of equally sized pools, each with its own heap
//! backing buffer that stays mapped for the pool's whole life. It decides
//! *which* pool serves a request; the pools themselves know nothing about
//! their siblings.
//!
//! Allocation order:
//! 1. reject requests larger than one pool
//! 2. try the pools that have enough aggregate space, most-filled first,
//!    without compaction
//! 3. retry the same candidates, letting each compact itself
//! 4. create a new pool if `max_pools` allows it
//! 5. otherwise drain sparse pools into fuller ones and retry step 3 once

use core::ptr::NonNull;

use tracing::{debug, error, trace, warn};

use crate::config::ManagerConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::handle::{Handle, PoolId};
use crate::pool::{Compaction, Pool};
use crate::stats::ManagerStats;

/// Heap buffer handed to exactly one pool
struct Backing {
    bytes: NonNull<[u8]>,
}

impl Backing {
    fn new(len: usize) -> MemoryResult<Self> {
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|_| MemoryError::invalid_layout("cannot reserve pool backing buffer"))?;
        buffer.resize(len, 0u8);
        Ok(Self {
            bytes: NonNull::from(Box::leak(buffer.into_boxed_slice())),
        })
    }

    fn base(&self) -> NonNull<u8> {
        self.bytes.cast()
    }
}

impl Drop for Backing {
    fn drop(&mut self) {
        // SAFETY: `bytes` came from `Box::leak` in `new` and is released once.
        drop(unsafe { Box::from_raw(self.bytes.as_ptr()) });
    }
}

/// A pool mapped onto its own backing buffer
///
/// Field order matters: the pool is dropped before the buffer it points at.
struct ManagedPool {
    pool: Pool,
    _backing: Backing,
}

impl ManagedPool {
    fn new(config: &ManagerConfig) -> MemoryResult<Self> {
        let mut pool = Pool::with_config(config.pool_capacity, config.pool)?;
        let backing = Backing::new(config.pool_capacity)?;
        // SAFETY: the buffer holds `pool_capacity` bytes, is reachable only
        // through this pool, and outlives it (see field order).
        unsafe { pool.open_access(backing.base()) };
        Ok(Self {
            pool,
            _backing: backing,
        })
    }
}

impl Drop for ManagedPool {
    fn drop(&mut self) {
        self.pool.close_access();
    }
}

/// Allocates across a growing set of pools and rebalances them
pub struct PoolManager {
    config: ManagerConfig,
    pools: Vec<ManagedPool>,
}

impl PoolManager {
    /// Creates an empty manager; pools are created on demand
    pub fn new(config: ManagerConfig) -> MemoryResult<Self> {
        config.validate()?;
        debug!(
            pool_capacity = config.pool_capacity,
            max_pools = config.max_pools,
            "pool manager created"
        );
        Ok(Self {
            config,
            pools: Vec::new(),
        })
    }

    /// Manager configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Number of pools currently alive
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Pool with the given id
    pub fn pool(&self, id: PoolId) -> Option<&Pool> {
        self.position(id).map(|index| &self.pools[index].pool)
    }

    /// Every pool, in creation order (modulo releases)
    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.iter().map(|managed| &managed.pool)
    }

    /// Allocates `size` bytes from some pool
    pub fn allocate(&mut self, size: usize) -> Option<Handle> {
        if size == 0 || size > self.config.pool_capacity {
            trace!(size, capacity = self.config.pool_capacity, "request larger than a pool");
            return None;
        }

        if let Some(handle) = self.allocate_existing(size, Compaction::Forbidden) {
            return Some(handle);
        }
        if let Some(handle) = self.allocate_existing(size, Compaction::Allowed) {
            return Some(handle);
        }
        if self.pools.len() < self.config.max_pools {
            match ManagedPool::new(&self.config) {
                Ok(mut managed) => {
                    let handle = managed.pool.allocate_with(size, Compaction::Forbidden);
                    debug!(pool = %managed.pool.id(), pools = self.pools.len() + 1, "pool added");
                    self.pools.push(managed);
                    return handle;
                }
                Err(err) => warn!(%err, "could not create pool"),
            }
        }

        if self.drain() == 0 {
            return None;
        }
        self.allocate_existing(size, Compaction::Allowed)
    }

    /// Like [`allocate`](Self::allocate), reporting failure as an error
    pub fn try_allocate(&mut self, size: usize) -> MemoryResult<Handle> {
        if size == 0 {
            return Err(MemoryError::invalid_layout("zero-sized request"));
        }
        self.allocate(size).ok_or_else(|| {
            let available = if size > self.config.pool_capacity {
                self.config.pool_capacity
            } else {
                self.stats().free_bytes()
            };
            MemoryError::exceeds_capacity(size, available)
        })
    }

    /// Frees `handle` in whichever pool currently holds it
    ///
    /// An emptied pool is released when configured, as long as another
    /// pool remains.
    pub fn free(&mut self, handle: Handle) -> MemoryResult<()> {
        let Some(id) = handle.pool() else {
            return Err(MemoryError::corruption(
                "manager",
                &format!("{handle:?} is not live"),
            ));
        };
        let Some(index) = self.position(id) else {
            error!(pool = %id, "free routed to an unknown pool");
            return Err(MemoryError::pool_not_found(id));
        };

        self.pools[index].pool.free(handle);
        if self.config.release_empty_pools
            && self.pools.len() > 1
            && self.pools[index].pool.is_empty()
        {
            let released = self.pools.swap_remove(index);
            debug!(pool = %released.pool.id(), pools = self.pools.len(), "pool released");
        }
        Ok(())
    }

    /// Drains the least-filled pools into fuller ones and releases any pool
    /// left empty; returns the number of bytes moved
    pub fn rebalance(&mut self) -> usize {
        let moved = self.drain();
        self.release_empty();
        moved
    }

    /// Fully compacts every fragmented pool; returns how many were compacted
    pub fn compact_all(&mut self) -> usize {
        let mut compacted = 0;
        for managed in &mut self.pools {
            if managed.pool.is_fragmented() {
                managed.pool.defragment(0);
                compacted += 1;
            }
        }
        debug!(compacted, "compacted all pools");
        compacted
    }

    /// Contents of the entry named by `handle`
    pub fn bytes(&self, handle: &Handle) -> Option<&[u8]> {
        let index = self.position(handle.pool()?)?;
        self.pools[index].pool.bytes(handle)
    }

    /// Mutable contents of the entry named by `handle`
    pub fn bytes_mut(&mut self, handle: &Handle) -> Option<&mut [u8]> {
        let index = self.position(handle.pool()?)?;
        self.pools[index].pool.bytes_mut(handle)
    }

    /// Offset of the entry inside its current pool
    pub fn offset_of(&self, handle: &Handle) -> Option<usize> {
        self.pool(handle.pool()?)?.offset_of(handle)
    }

    /// Aggregate statistics
    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats::default();
        for managed in &self.pools {
            stats.record(&managed.pool.stats());
        }
        stats
    }

    /// Validates every pool and checks that each is mapped
    pub fn validate(&self) -> MemoryResult<()> {
        for managed in &self.pools {
            managed.pool.validate()?;
            if !managed.pool.is_mapped() {
                return Err(MemoryError::access_required(managed.pool.id()));
            }
        }
        Ok(())
    }

    fn position(&self, id: PoolId) -> Option<usize> {
        self.pools.iter().position(|managed| managed.pool.id() == id)
    }

    /// Pools that could hold `size`, most-filled first
    fn candidates(&self, size: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.pools.len())
            .filter(|&index| self.pools[index].pool.has_space(size))
            .collect();
        order.sort_by_key(|&index| core::cmp::Reverse(self.pools[index].pool.used_bytes()));
        order
    }

    fn allocate_existing(&mut self, size: usize, compaction: Compaction) -> Option<Handle> {
        self.candidates(size)
            .into_iter()
            .find_map(|index| self.pools[index].pool.allocate_with(size, compaction))
    }

    /// Moves entries from sparse pools into fuller ones without releasing
    fn drain(&mut self) -> usize {
        let mut order: Vec<usize> = (0..self.pools.len()).collect();
        order.sort_by_key(|&index| self.pools[index].pool.used_bytes());

        let mut moved = 0;
        for (rank, &src) in order.iter().enumerate() {
            for &dst in order[rank + 1..].iter().rev() {
                let (dst_pool, src_pool) = pair_mut(&mut self.pools, dst, src);
                if src_pool.is_empty() {
                    break;
                }
                if dst_pool.is_full() {
                    continue;
                }
                moved += if dst_pool.is_fragmented() {
                    dst_pool.transfer_all_fitting(src_pool)
                } else {
                    dst_pool.transfer_best_effort(src_pool)
                };
            }
        }
        debug!(moved, pools = self.pools.len(), "pools drained");
        moved
    }

    fn release_empty(&mut self) {
        if !self.config.release_empty_pools {
            return;
        }
        let mut index = 0;
        while index < self.pools.len() {
            if self.pools.len() > 1 && self.pools[index].pool.is_empty() {
                let released = self.pools.swap_remove(index);
                debug!(pool = %released.pool.id(), "pool released");
            } else {
                index += 1;
            }
        }
    }
}

impl core::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolManager")
            .field("config", &self.config)
            .field("pools", &self.pools.len())
            .finish()
    }
}

/// Two distinct pools borrowed mutably at once
fn pair_mut(pools: &mut [ManagedPool], a: usize, b: usize) -> (&mut Pool, &mut Pool) {
    debug_assert_ne!(a, b);
    if a < b {
        let (low, high) = pools.split_at_mut(b);
        (&mut low[a].pool, &mut high[0].pool)
    } else {
        let (low, high) = pools.split_at_mut(a);
        (&mut high[0].pool, &mut low[b].pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn manager(capacity: usize, max_pools: usize) -> PoolManager {
        PoolManager::new(ManagerConfig {
            pool: PoolConfig::debug(),
            ..ManagerConfig::new(capacity, max_pools)
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(PoolManager::new(ManagerConfig::new(0, 1)).is_err());
    }

    #[test]
    fn test_pools_created_on_demand() {
        let mut manager = manager(100, 2);
        assert_eq!(manager.pool_count(), 0);

        let a = manager.allocate(60).unwrap();
        let b = manager.allocate(60).unwrap();
        assert_eq!(manager.pool_count(), 2);
        assert_ne!(a.pool(), b.pool());

        assert!(manager.allocate(60).is_none());
        assert!(manager.allocate(101).is_none());
        assert!(manager.validate().is_ok());
    }

    #[test]
    fn test_most_filled_pool_preferred() {
        let mut manager = manager(100, 2);
        let a = manager.allocate(60).unwrap();
        let _b = manager.allocate(50).unwrap();

        let c = manager.allocate(30).unwrap();
        assert_eq!(c.pool(), a.pool());
    }

    #[test]
    fn test_free_releases_empty_pool() {
        let mut manager = manager(100, 2);
        let _a = manager.allocate(60).unwrap();
        let b = manager.allocate(60).unwrap();

        manager.free(b).unwrap();
        assert_eq!(manager.pool_count(), 1);
    }

    #[test]
    fn test_last_pool_is_kept() {
        let mut manager = manager(100, 2);
        let a = manager.allocate(60).unwrap();
        manager.free(a).unwrap();
        assert_eq!(manager.pool_count(), 1);
    }

    #[test]
    fn test_pool_compacts_before_new_pool() {
        let mut manager = manager(100, 1);
        let _a = manager.allocate(30).unwrap();
        let b = manager.allocate(30).unwrap();
        let c = manager.allocate(30).unwrap();
        manager.bytes_mut(&c).unwrap().fill(9);
        manager.free(b).unwrap();

        let d = manager.allocate(35).unwrap();
        assert_eq!(manager.offset_of(&c), Some(30));
        assert_eq!(manager.offset_of(&d), Some(60));
        assert!(manager.bytes(&c).unwrap().iter().all(|&x| x == 9));
    }

    #[test]
    fn test_rebalance_drains_sparse_pool() {
        let mut manager = manager(100, 2);
        let a = manager.allocate(60).unwrap();
        let b = manager.allocate(30).unwrap();
        let _c = manager.allocate(50).unwrap();
        let d = manager.allocate(20).unwrap();
        let first = a.pool();
        assert_eq!(b.pool(), first);
        assert_ne!(d.pool(), first);

        manager.bytes_mut(&b).unwrap().fill(7);
        manager.free(a).unwrap();

        assert_eq!(manager.rebalance(), 30);
        assert_eq!(manager.pool_count(), 1);
        assert_eq!(b.pool(), d.pool());
        assert_eq!(manager.offset_of(&b), Some(70));
        assert!(manager.bytes(&b).unwrap().iter().all(|&x| x == 7));
    }

    #[test]
    fn test_allocate_drains_when_out_of_pools() {
        let mut manager = manager(100, 2);
        let a = manager.allocate(60).unwrap();
        let b = manager.allocate(30).unwrap();
        let _c = manager.allocate(50).unwrap();
        let _d = manager.allocate(20).unwrap();
        manager.free(a).unwrap();

        // 70 free in the first pool, 30 in the second: only draining the
        // first makes room for 80.
        let e = manager.allocate(80).unwrap();
        assert_ne!(e.pool(), b.pool());
        assert_eq!(manager.pool_count(), 2);
        assert!(manager.validate().is_ok());
    }

    #[test]
    fn test_try_allocate_reports_capacity() {
        let mut manager = manager(100, 1);
        let err = manager.try_allocate(200).unwrap_err();
        assert_eq!(err, MemoryError::exceeds_capacity(200, 100));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_compact_all() {
        let mut manager = manager(100, 1);
        let a = manager.allocate(10).unwrap();
        let b = manager.allocate(10).unwrap();
        manager.free(a).unwrap();

        assert_eq!(manager.compact_all(), 1);
        assert_eq!(manager.offset_of(&b), Some(0));
        assert_eq!(manager.stats().fragmented_pools, 0);
    }
}
