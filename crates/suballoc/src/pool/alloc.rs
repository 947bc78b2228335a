//! Allocation and release
//!
//! The scan is first-fit over the occupancy bitmap. Because live slots are
//! kept in address order, the gap available to a free index `e` is bounded
//! by the entry at `e - 1` (or offset 0) and by the first live entry after
//! `e` (or the capacity). Only the first index of every free run needs to be
//! examined.

use tracing::{error, trace};

use super::Pool;
use crate::handle::Handle;

/// Whether an allocation may compact the pool when free space is scattered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compaction {
    /// Compact once and retry when no single gap fits
    Allowed,
    /// Fail instead of moving any entry
    Forbidden,
}

impl Pool {
    /// Allocates `size` bytes
    ///
    /// Fails with `None` when no single gap fits, even if enough free bytes
    /// are scattered across holes; the pool is left consistent and usable.
    /// Only with [`PoolConfig::compact_on_failure`] set (the `debug()`
    /// preset) does a failed scan compact the pool and retry once.
    ///
    /// [`PoolConfig::compact_on_failure`]: crate::config::PoolConfig::compact_on_failure
    pub fn allocate(&mut self, size: usize) -> Option<Handle> {
        let compaction = if self.config.compact_on_failure {
            Compaction::Allowed
        } else {
            Compaction::Forbidden
        };
        self.allocate_with(size, compaction)
    }

    /// Allocates `size` bytes with an explicit compaction policy
    ///
    /// Compaction needs an open access session; on an unmapped pool it is
    /// skipped and the request fails instead.
    pub fn allocate_with(&mut self, size: usize, compaction: Compaction) -> Option<Handle> {
        let Some((index, offset)) = self.reserve(size, compaction) else {
            self.track(|c| c.failed_allocations += 1);
            trace!(pool = %self.id, size, free = self.free_bytes, "allocation failed");
            return None;
        };

        let (handle, owner) = Handle::bind(self.id, index as u32);
        self.place(index, offset, size, Some(owner));
        self.refresh_exhausted();
        self.track(|c| c.allocations += 1);
        trace!(pool = %self.id, size, index, offset, "allocated");

        self.debug_validate();
        Some(handle)
    }

    /// Frees the entry named by `handle`
    ///
    /// The handle is consumed and its location cleared. Freeing a handle
    /// that does not belong to this pool is a programmer error.
    pub fn free(&mut self, handle: Handle) {
        let index = self.resolve(&handle);
        debug_assert!(index.is_some(), "{} asked to free {handle:?}", self.id);
        let Some(index) = index else {
            error!(pool = %self.id, ?handle, "free of a handle this pool does not own");
            return;
        };

        let was_tail = self.last_live() == Some(index);
        let slot = self.take(index);
        if let Some(owner) = &slot.owner {
            owner.invalidate();
        }
        self.scrub(slot.offset, slot.size);
        self.after_release(was_tail);

        self.track(|c| c.frees += 1);
        trace!(pool = %self.id, size = slot.size, index, "freed");
        self.debug_validate();
    }

    /// Updates the fragmentation flag and slot table after an entry left
    pub(crate) fn after_release(&mut self, was_tail: bool) {
        if self.occupancy.not_any() {
            self.fragmented = false;
            self.shrink_if_empty();
        } else if !was_tail {
            self.fragmented = true;
        }
    }

    /// Finds `(slot index, offset)` for `size` bytes without claiming it
    pub(crate) fn reserve(&mut self, size: usize, compaction: Compaction) -> Option<(usize, usize)> {
        if size == 0 || size > self.free_bytes || self.exhausted {
            return None;
        }
        if let Some(found) = self.find_gap_growing(size) {
            return Some(found);
        }
        if self.exhausted || compaction == Compaction::Forbidden {
            return None;
        }
        if !self.is_mapped() {
            trace!(pool = %self.id, size, "compaction skipped: pool not mapped");
            return None;
        }

        self.defragment(size);
        self.find_gap_growing(size)
    }

    /// Scan, growing the slot table once if the tail is only unreachable
    /// for lack of a free index
    fn find_gap_growing(&mut self, size: usize) -> Option<(usize, usize)> {
        if let Some(found) = self.find_gap(size) {
            return Some(found);
        }

        let len = self.occupancy.len();
        let tail_blocked = self.last_live() == Some(len - 1);
        if !tail_blocked {
            return None;
        }
        let tail = self.tail_offset();
        if self.capacity - tail < size {
            return None;
        }
        if self.grow_slots() {
            return Some((len, tail));
        }
        if self.occupancy.all() {
            self.exhausted = true;
        }
        None
    }

    /// First-fit scan of the occupancy bitmap
    fn find_gap(&self, size: usize) -> Option<(usize, usize)> {
        let len = self.occupancy.len();
        let mut from = 0;

        while from < len {
            let free = from + self.occupancy[from..].first_zero()?;
            // Everything in [from, free) is live, so the predecessor is free - 1.
            let gap_start = if free == 0 {
                0
            } else {
                self.slots[free - 1].end()
            };
            let next_live = self.first_live_from(free);
            let gap_end = next_live.map_or(self.capacity, |index| self.slots[index].offset);

            if gap_end - gap_start >= size {
                return Some((free, gap_start));
            }
            from = next_live? + 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::config::PoolConfig;

    #[test]
    fn test_sequential_allocations_are_contiguous() {
        let mut pool = Pool::new(1024, 8).unwrap();
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(200).unwrap();
        let c = pool.allocate(50).unwrap();

        assert_eq!(pool.offset_of(&a), Some(0));
        assert_eq!(pool.offset_of(&b), Some(100));
        assert_eq!(pool.offset_of(&c), Some(300));
        assert_eq!(
            (a.slot_index(), b.slot_index(), c.slot_index()),
            (0, 1, 2)
        );
        assert_eq!(pool.available_bytes(), 674);
        assert!(!pool.is_fragmented());
    }

    #[rstest]
    #[case(0)]
    #[case(1025)]
    #[case(usize::MAX)]
    fn test_rejected_sizes_leave_pool_untouched(#[case] size: usize) {
        let mut pool = Pool::new(1024, 4).unwrap();
        assert!(pool.allocate(size).is_none());
        assert_eq!(pool.available_bytes(), 1024);
        assert_eq!(pool.slot_capacity(), 4);
    }

    #[test]
    fn test_freed_hole_is_reused() {
        let mut pool = Pool::new(300, 4).unwrap();
        let a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();
        let _c = pool.allocate(100).unwrap();

        pool.free(b);
        assert!(pool.is_fragmented());

        let d = pool.allocate(80).unwrap();
        assert_eq!(pool.offset_of(&d), Some(100));
        assert_eq!(d.slot_index(), 1);
        assert_eq!(pool.offset_of(&a), Some(0));
    }

    #[test]
    fn test_free_tail_does_not_fragment() {
        let mut pool = Pool::new(300, 4).unwrap();
        let _a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();

        pool.free(b);
        assert!(!pool.is_fragmented());
        assert_eq!(pool.available_bytes(), 200);
    }

    #[test]
    fn test_free_invalidates_handle_location() {
        let mut pool = Pool::new(64, 4).unwrap();
        let handle = pool.allocate(16).unwrap();
        let (held_pool, held_slot) = (handle.pool(), handle.slot_index());
        assert_eq!(held_pool, Some(pool.id()));
        assert_eq!(held_slot, 0);

        pool.free(handle);
        assert!(pool.is_empty());
        assert!(!pool.is_fragmented());
    }

    #[test]
    fn test_slot_table_grows_for_tail_space() {
        let config = PoolConfig::default().with_initial_slots(2);
        let mut pool = Pool::with_config(100, config).unwrap();
        let _a = pool.allocate(10).unwrap();
        let _b = pool.allocate(10).unwrap();
        assert_eq!(pool.slot_capacity(), 2);

        let c = pool.allocate(10).unwrap();
        assert_eq!(pool.slot_capacity(), 4);
        assert_eq!(c.slot_index(), 2);
        assert_eq!(pool.offset_of(&c), Some(20));
    }

    #[test]
    fn test_slot_table_exhaustion_is_recoverable() {
        let config = PoolConfig::default().with_initial_slots(2).with_max_slots(2);
        let mut pool = Pool::with_config(100, config).unwrap();
        let a = pool.allocate(10).unwrap();
        let _b = pool.allocate(10).unwrap();

        assert!(pool.is_exhausted());
        assert!(pool.is_full());
        assert!(pool.allocate(10).is_none());
        assert_eq!(pool.available_bytes(), 80);

        pool.free(a);
        assert!(!pool.is_exhausted());
        assert!(pool.allocate(10).is_some());
    }

    #[test]
    fn test_slot_table_shrinks_when_empty() {
        let config = PoolConfig::default().with_initial_slots(1);
        let mut pool = Pool::with_config(100, config).unwrap();
        let handles: Vec<_> = (0..4).map(|_| pool.allocate(10).unwrap()).collect();
        assert_eq!(pool.slot_capacity(), 4);

        for handle in handles {
            pool.free(handle);
        }
        assert_eq!(pool.slot_capacity(), 1);
    }

    #[test]
    fn test_forbidden_compaction_fails_on_scattered_space() {
        let mut memory = vec![0u8; 300];
        let mut pool = Pool::new(300, 4).unwrap();
        let mut pool = pool.map(&mut memory).unwrap();
        let _a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();
        let _c = pool.allocate(50).unwrap();
        pool.free(b);

        // 100-byte hole plus 50-byte tail: 150 free, no single gap of 120.
        assert!(pool.allocate_with(120, Compaction::Forbidden).is_none());
        assert!(pool.allocate_with(120, Compaction::Allowed).is_some());
    }

    #[test]
    fn test_unmapped_pool_does_not_compact() {
        let mut pool = Pool::new(300, 4).unwrap();
        let _a = pool.allocate(100).unwrap();
        let b = pool.allocate(100).unwrap();
        let _c = pool.allocate(50).unwrap();
        pool.free(b);

        assert!(pool.allocate_with(120, Compaction::Allowed).is_none());
        assert!(pool.is_fragmented());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "asked to free")]
    fn test_foreign_free_is_misuse() {
        let mut first = Pool::new(64, 4).unwrap();
        let mut second = Pool::new(64, 4).unwrap();
        let handle = first.allocate(8).unwrap();
        second.free(handle);
    }
}
