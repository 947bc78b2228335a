//! In-place compaction

use tracing::debug;

use super::Pool;
use super::access::move_within;

impl Pool {
    /// Slides live entries toward offset 0 until a single gap of at least
    /// `needed` bytes exists, returning the index of the last live entry
    ///
    /// Entries are visited in index (and therefore address) order. Each one
    /// that does not directly follow its predecessor is copied down and
    /// given the next compacted index; its handle is rewritten in place.
    /// The pass stops early once the gap in front of the next unprocessed
    /// entry is large enough and a free index precedes it. `needed == 0`
    /// compacts the whole pool.
    ///
    /// Moving bytes requires an open access session. An already compact
    /// pool is a no-op without one.
    pub fn defragment(&mut self, needed: usize) -> Option<u32> {
        let mut cursor = 0;
        let mut next_index = 0;
        let mut relocated = 0u64;
        let mut bytes_moved = 0u64;
        let mut from = 0;

        while let Some(index) = self.first_live_from(from) {
            let (offset, size) = {
                let slot = &self.slots[index];
                (slot.offset, slot.size)
            };
            if needed > 0 && index > next_index && offset - cursor >= needed {
                break;
            }

            if index != next_index || offset != cursor {
                if offset != cursor {
                    let Some(base) = self.require_base() else {
                        break;
                    };
                    // SAFETY: both ranges lie within the mapped capacity;
                    // `cursor <= offset` and the destination only overlaps
                    // free space or this entry's own bytes.
                    unsafe { move_within(base, offset, cursor, size) };
                    bytes_moved += size as u64;
                }
                let slot = self.take(index);
                self.place(next_index, cursor, slot.size, slot.owner);
                relocated += 1;
            }

            cursor += size;
            next_index += 1;
            from = index + 1;
        }

        self.fragmented = self.has_holes();
        self.refresh_exhausted();
        self.track(|c| {
            c.compactions += 1;
            c.entries_relocated += relocated;
            c.bytes_relocated += bytes_moved;
        });
        debug!(
            pool = %self.id,
            needed,
            relocated,
            bytes_moved,
            largest_gap = self.largest_gap(),
            "compaction pass"
        );

        self.debug_validate();
        self.last_live().map(|index| index as u32)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::PoolConfig;
    use crate::pool::{Mapping, Pool};

    fn fill(pool: &mut Mapping<'_>, sizes: &[usize]) -> Vec<crate::Handle> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| {
                let handle = pool.allocate(size).unwrap();
                pool.bytes_mut(&handle).unwrap().fill(i as u8 + 1);
                handle
            })
            .collect()
    }

    #[test]
    fn test_full_compaction_preserves_contents() {
        let mut memory = vec![0u8; 400];
        let mut pool = Pool::with_config(400, PoolConfig::debug()).unwrap();
        let mut pool = pool.map(&mut memory).unwrap();

        let mut handles = fill(&mut pool, &[50, 60, 70, 80]);
        let second = handles.remove(1);
        pool.free(second);
        let first = handles.remove(0);
        pool.free(first);
        assert!(pool.is_fragmented());

        let last = pool.defragment(0);
        assert_eq!(last, Some(1));
        assert!(!pool.is_fragmented());

        assert_eq!(pool.offset_of(&handles[0]), Some(0));
        assert_eq!(pool.offset_of(&handles[1]), Some(70));
        assert_eq!(handles[0].slot_index(), 0);
        assert_eq!(handles[1].slot_index(), 1);
        assert!(pool.bytes(&handles[0]).unwrap().iter().all(|&b| b == 3));
        assert!(pool.bytes(&handles[1]).unwrap().iter().all(|&b| b == 4));
        assert_eq!(pool.largest_gap(), 250);

        let stats = pool.stats();
        assert_eq!(stats.compactions, 1);
        assert_eq!(stats.entries_relocated, 2);
        assert_eq!(stats.bytes_relocated, 150);
    }

    #[test]
    fn test_second_pass_moves_nothing() {
        let mut memory = vec![0u8; 300];
        let mut pool = Pool::with_config(300, PoolConfig::debug()).unwrap();
        let mut pool = pool.map(&mut memory).unwrap();

        let mut handles = fill(&mut pool, &[40, 40, 40, 40]);
        let freed = handles.remove(1);
        pool.free(freed);

        pool.defragment(100);
        let moved = pool.stats().bytes_relocated;
        pool.defragment(100);
        assert_eq!(pool.stats().bytes_relocated, moved);
        assert_eq!(pool.stats().compactions, 2);
    }

    #[test]
    fn test_early_stop_leaves_later_holes() {
        let mut memory = vec![0u8; 400];
        let mut pool = Pool::with_config(400, PoolConfig::debug()).unwrap();
        let mut pool = pool.map(&mut memory).unwrap();

        // [a:50][hole:100][c:50][hole:50][e:50] + 100 tail
        let mut handles = fill(&mut pool, &[50, 100, 50, 50, 50]);
        let d = handles.remove(3);
        let b = handles.remove(1);
        pool.free(b);
        pool.free(d);

        // The 100-byte hole already satisfies the request behind free index 1.
        pool.defragment(100);
        assert_eq!(pool.stats().bytes_relocated, 0);
        assert!(pool.is_fragmented());
        assert_eq!(pool.offset_of(&handles[1]), Some(150));
    }

    #[test]
    fn test_sufficiency_after_compaction() {
        let mut memory = vec![0u8; 1000];
        let mut pool = Pool::new(1000, 4).unwrap();
        let mut pool = pool.map(&mut memory).unwrap();

        let mut handles = fill(&mut pool, &[200, 200, 200, 200, 150]);
        let third = handles.remove(2);
        pool.free(third);
        let first = handles.remove(0);
        pool.free(first);

        // 450 free as 200 + 200 + 50; nothing of 400 fits until compacted.
        assert!(pool.allocate_with(400, crate::Compaction::Forbidden).is_none());
        pool.defragment(400);
        assert!(pool.allocate_with(400, crate::Compaction::Forbidden).is_some());
    }

    #[test]
    fn test_compact_pool_without_session_is_noop() {
        let mut pool = Pool::new(100, 4).unwrap();
        let a = pool.allocate(10).unwrap();
        let b = pool.allocate(10).unwrap();
        pool.free(b);

        assert_eq!(pool.defragment(50), Some(0));
        assert_eq!(pool.offset_of(&a), Some(0));
        assert!(!pool.is_fragmented());
    }

    #[test]
    fn test_renumbering_without_session() {
        let mut pool = Pool::new(100, 4).unwrap();
        let a = pool.allocate(10).unwrap();
        let b = pool.allocate(10).unwrap();
        let c = pool.allocate(10).unwrap();
        pool.free(a);
        pool.free(b);

        // Fills the byte hole but leaves index 1 free in front of `c`.
        let d = pool.allocate(20).unwrap();
        assert_eq!((d.slot_index(), c.slot_index()), (0, 2));

        assert_eq!(pool.defragment(0), Some(1));
        assert_eq!(c.slot_index(), 1);
        assert_eq!(pool.offset_of(&c), Some(20));
        assert!(!pool.is_fragmented());
    }

    #[test]
    fn test_empty_pool() {
        let mut pool = Pool::new(100, 4).unwrap();
        assert_eq!(pool.defragment(10), None);
        assert!(!pool.is_fragmented());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "without a session")]
    fn test_moving_without_session_is_misuse() {
        let mut pool = Pool::new(100, 4).unwrap();
        let a = pool.allocate(10).unwrap();
        let _b = pool.allocate(10).unwrap();
        pool.free(a);
        pool.defragment(0);
    }
}
