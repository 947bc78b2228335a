//! Cross-pool entry migration
//!
//! Both variants move live entries from `src` into `self` and rewrite each
//! moved entry's handle to name the destination. Handles stay valid
//! throughout; only their location changes. Both pools must be mapped
//! whenever `src` holds entries.

use tracing::debug;

use super::access::copy_between;
use super::{Compaction, Pool};

impl Pool {
    /// Compacts `self`, then appends every live entry of `src` that still
    /// fits in the trailing free gap, in ascending slot order
    ///
    /// Returns the number of bytes moved. `self` ends fully compacted.
    pub fn transfer_all_fitting(&mut self, src: &mut Pool) -> usize {
        if src.is_empty() {
            return 0;
        }
        let (Some(dst_base), Some(src_base)) = (self.require_base(), src.require_base()) else {
            return 0;
        };

        self.defragment(0);
        let mut cursor = self.tail_offset();
        let mut next_index = self.last_live().map_or(0, |index| index + 1);
        let mut moved = Moved::default();

        let mut from = 0;
        while let Some(index) = src.first_live_from(from) {
            from = index + 1;
            if self.free_bytes == 0 {
                break;
            }
            let (offset, size) = (src.slots[index].offset, src.slots[index].size);
            if size > self.capacity - cursor {
                continue;
            }
            if next_index >= self.slots.len() && !self.grow_slots() {
                break;
            }

            // SAFETY: distinct pools with their own sessions; the source
            // range is live in `src` and the destination range is the free
            // tail of `self`.
            unsafe { copy_between(src_base, offset, dst_base, cursor, size) };
            let slot = src.take(index);
            src.scrub(offset, size);
            self.place(next_index, cursor, size, slot.owner);

            moved.record(size);
            cursor += size;
            next_index += 1;
        }

        self.finish_transfer(src, moved, "all_fitting");
        moved.bytes
    }

    /// Allocates room in `self` for each live entry of `src` without
    /// compacting either pool, moving every entry that finds a gap
    ///
    /// Once a size has failed, every entry at least that big is skipped for
    /// the rest of the pass. Returns the number of bytes moved.
    pub fn transfer_best_effort(&mut self, src: &mut Pool) -> usize {
        if src.is_empty() {
            return 0;
        }
        let (Some(dst_base), Some(src_base)) = (self.require_base(), src.require_base()) else {
            return 0;
        };

        let mut smallest_failed: Option<usize> = None;
        let mut moved = Moved::default();

        let mut from = 0;
        while let Some(index) = src.first_live_from(from) {
            from = index + 1;
            if self.is_full() {
                break;
            }
            let (offset, size) = (src.slots[index].offset, src.slots[index].size);
            if smallest_failed.is_some_and(|failed| size >= failed) {
                continue;
            }

            let Some((dst_index, dst_offset)) = self.reserve(size, Compaction::Forbidden) else {
                smallest_failed = Some(smallest_failed.map_or(size, |failed| failed.min(size)));
                continue;
            };

            // SAFETY: as in `transfer_all_fitting`; `reserve` returned a free
            // range of `size` bytes inside `self`.
            unsafe { copy_between(src_base, offset, dst_base, dst_offset, size) };
            let slot = src.take(index);
            src.scrub(offset, size);
            self.place(dst_index, dst_offset, size, slot.owner);
            self.refresh_exhausted();

            moved.record(size);
        }

        self.finish_transfer(src, moved, "best_effort");
        moved.bytes
    }

    fn finish_transfer(&mut self, src: &mut Pool, moved: Moved, variant: &'static str) {
        if moved.entries > 0 {
            src.after_release(false);
        }
        self.refresh_exhausted();
        self.track(|c| {
            c.entries_relocated += moved.entries;
            c.bytes_relocated += moved.bytes as u64;
        });

        debug!(
            from = %src.id(),
            to = %self.id(),
            variant,
            relocated = moved.entries,
            bytes_moved = moved.bytes,
            "transfer finished"
        );
        src.debug_validate();
        self.debug_validate();
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Moved {
    entries: u64,
    bytes: usize,
}

impl Moved {
    fn record(&mut self, size: usize) {
        self.entries += 1;
        self.bytes += size;
    }
}
