//! Compacting pool over a fixed-capacity byte range
//!
//! A [`Pool`] hands out variably-sized entries from `[0, capacity)` and can
//! physically move them later (compaction, cross-pool transfer) without
//! breaking the caller's [`Handle`]s.
//!
//! # Layout
//!
//! ```text
//! slot index:  0        1        2    3        4
//! occupancy:   1        1        0    1        0
//! bytes:      [entry 0][entry 1][hole][entry 3][......... tail .........]
//!             0                                                  capacity
//! ```
//!
//! Live slots are kept in address order: for live `i < j`,
//! `slots[i].end() <= slots[j].offset`. Every algorithm in this module
//! relies on that ordering to find the neighbours of a free index with a
//! single bitmap lookup.
//!
//! The pool never owns its bytes. They are bound with
//! [`Pool::open_access`] / [`Pool::map`] for the duration of any operation
//! that reads, writes or moves entry contents.

mod access;
mod alloc;
mod defrag;
mod transfer;
mod validate;

use core::mem;
use core::ptr::NonNull;

use bitvec::prelude::*;
use tracing::{debug, warn};

pub use access::Mapping;
pub use alloc::Compaction;
pub use validate::PoolDump;

use crate::config::PoolConfig;
use crate::error::{MemoryError, MemoryResult};
use crate::handle::{Handle, Owner, PoolId};
use crate::stats::{Counters, PoolStats};

/// Internal entry descriptor
#[derive(Debug, Default)]
pub(crate) struct Slot {
    pub(crate) offset: usize,
    pub(crate) size: usize,
    /// `Some` exactly when the slot's occupancy bit is set
    pub(crate) owner: Option<Owner>,
}

impl Slot {
    #[inline]
    pub(crate) fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Compacting sub-allocator over one byte range
///
/// Single-threaded: the pool is neither `Send` nor `Sync`, and callers
/// serialize all access to it (and to both pools of a transfer).
pub struct Pool {
    id: PoolId,
    capacity: usize,
    free_bytes: usize,
    occupancy: BitVec,
    slots: Vec<Slot>,
    fragmented: bool,
    exhausted: bool,
    base: Option<NonNull<u8>>,
    access_count: u32,
    config: PoolConfig,
    counters: Counters,
}

impl Pool {
    /// Creates a pool of `capacity` bytes with room for `initial_slots`
    /// concurrent entries before the slot table grows
    pub fn new(capacity: usize, initial_slots: usize) -> MemoryResult<Self> {
        Self::with_config(
            capacity,
            PoolConfig::default().with_initial_slots(initial_slots),
        )
    }

    /// Creates a pool with custom configuration
    ///
    /// Only the bookkeeping is allocated here. The byte range itself is
    /// supplied later through an access session.
    pub fn with_config(capacity: usize, config: PoolConfig) -> MemoryResult<Self> {
        config.validate()?;
        if capacity == 0 {
            return Err(MemoryError::invalid_layout("pool capacity must be non-zero"));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(config.initial_slots)
            .map_err(|_| MemoryError::invalid_layout("cannot reserve slot table"))?;
        slots.resize_with(config.initial_slots, Slot::default);

        let pool = Self {
            id: PoolId::next(),
            capacity,
            free_bytes: capacity,
            occupancy: bitvec![0; config.initial_slots],
            slots,
            fragmented: false,
            exhausted: false,
            base: None,
            access_count: 0,
            config,
            counters: Counters::default(),
        };
        debug!(pool = %pool.id, capacity, slots = config.initial_slots, "pool created");
        Ok(pool)
    }

    /// Identifier stored in every handle of this pool
    #[inline]
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Total addressable bytes
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes not held by any entry (not necessarily contiguous)
    #[inline]
    pub fn available_bytes(&self) -> usize {
        self.free_bytes
    }

    /// Bytes held by live entries
    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.capacity - self.free_bytes
    }

    /// Number of live entries
    pub fn live_entries(&self) -> usize {
        self.occupancy.count_ones()
    }

    /// Current slot-table size
    #[inline]
    pub fn slot_capacity(&self) -> usize {
        self.slots.len()
    }

    /// Configuration the pool was created with
    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// No request can succeed: either no byte is free or the slot table is
    /// exhausted
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_bytes == 0 || self.exhausted
    }

    /// No live entries
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.free_bytes == self.capacity
    }

    /// Cheap pre-check: enough aggregate free bytes and a usable slot table.
    /// A `true` answer does not guarantee a contiguous gap.
    #[inline]
    pub fn has_space(&self, size: usize) -> bool {
        size != 0 && size <= self.free_bytes && !self.exhausted
    }

    /// Whether holes exist before the last live entry
    #[inline]
    pub fn is_fragmented(&self) -> bool {
        self.fragmented
    }

    /// Whether the slot table is known to have no usable index left
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Current byte offset of the entry named by `handle`
    pub fn offset_of(&self, handle: &Handle) -> Option<usize> {
        self.resolve(handle).map(|index| self.slots[index].offset)
    }

    /// Size of the entry named by `handle`
    pub fn size_of(&self, handle: &Handle) -> Option<usize> {
        self.resolve(handle).map(|index| self.slots[index].size)
    }

    /// Whether `handle` names a live entry of this pool
    pub fn contains(&self, handle: &Handle) -> bool {
        self.resolve(handle).is_some()
    }

    /// Largest contiguous free gap, in bytes
    pub fn largest_gap(&self) -> usize {
        let mut largest = 0;
        let mut cursor = 0;
        for index in self.occupancy.iter_ones() {
            let slot = &self.slots[index];
            largest = largest.max(slot.offset - cursor);
            cursor = slot.end();
        }
        largest.max(self.capacity - cursor)
    }

    /// Statistics snapshot
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            used_bytes: self.used_bytes(),
            free_bytes: self.free_bytes,
            live_entries: self.live_entries(),
            slot_capacity: self.slots.len(),
            largest_gap: self.largest_gap(),
            fragmented: self.fragmented,
            allocations: self.counters.allocations,
            failed_allocations: self.counters.failed_allocations,
            frees: self.counters.frees,
            compactions: self.counters.compactions,
            entries_relocated: self.counters.entries_relocated,
            bytes_relocated: self.counters.bytes_relocated,
        }
    }

    // ------------------------------------------------------------------
    // Slot-table bookkeeping shared by allocation, compaction and transfer
    // ------------------------------------------------------------------

    /// Slot index of the live entry named by `handle`
    pub(crate) fn resolve(&self, handle: &Handle) -> Option<usize> {
        let location = handle.location();
        if location.pool != Some(self.id) {
            return None;
        }
        let index = location.slot as usize;
        if index >= self.occupancy.len() || !self.occupancy[index] {
            return None;
        }
        let owned = self.slots[index]
            .owner
            .as_ref()
            .is_some_and(|owner| owner.is_owned_by(handle));
        debug_assert!(owned, "{} slot {index} is owned by another handle", self.id);
        owned.then_some(index)
    }

    /// First live slot at or after `from`
    pub(crate) fn first_live_from(&self, from: usize) -> Option<usize> {
        if from >= self.occupancy.len() {
            return None;
        }
        self.occupancy[from..].first_one().map(|index| from + index)
    }

    /// Highest live slot index
    #[inline]
    pub(crate) fn last_live(&self) -> Option<usize> {
        self.occupancy.last_one()
    }

    /// End offset of the highest live entry, 0 when empty
    pub(crate) fn tail_offset(&self) -> usize {
        self.last_live().map_or(0, |index| self.slots[index].end())
    }

    /// Claims `index` for an entry at `offset` and points `owner` at it
    pub(crate) fn place(&mut self, index: usize, offset: usize, size: usize, owner: Option<Owner>) {
        debug_assert!(!self.occupancy[index], "{} slot {index} already live", self.id);
        debug_assert!(offset + size <= self.capacity);

        if let Some(owner) = &owner {
            owner.relocate(self.id, index as u32);
        }
        self.slots[index] = Slot {
            offset,
            size,
            owner,
        };
        self.occupancy.set(index, true);
        self.free_bytes -= size;
    }

    /// Releases `index`, returning its descriptor with the owner untouched
    pub(crate) fn take(&mut self, index: usize) -> Slot {
        debug_assert!(self.occupancy[index], "{} slot {index} not live", self.id);

        let slot = mem::take(&mut self.slots[index]);
        self.occupancy.set(index, false);
        self.free_bytes += slot.size;
        self.exhausted = false;
        slot
    }

    /// Doubles the slot table, bounded by `max_slots`
    pub(crate) fn grow_slots(&mut self) -> bool {
        let current = self.slots.len();
        let target = (current * 2).min(self.config.max_slots);
        if target <= current {
            return false;
        }
        if self.slots.try_reserve_exact(target - current).is_err() {
            warn!(pool = %self.id, current, target, "slot table growth failed");
            return false;
        }
        self.slots.resize_with(target, Slot::default);
        self.occupancy.resize(target, false);
        self.exhausted = false;
        debug!(pool = %self.id, from = current, to = target, "slot table grown");
        true
    }

    /// Returns the slot table to its initial size once nothing is live
    pub(crate) fn shrink_if_empty(&mut self) {
        let initial = self.config.initial_slots;
        if self.occupancy.any() || self.slots.len() <= initial {
            return;
        }
        self.slots.truncate(initial);
        self.slots.shrink_to_fit();
        self.occupancy.truncate(initial);
        self.occupancy.shrink_to_fit();
        self.exhausted = false;
    }

    /// Marks the table exhausted when every index is live and it cannot grow
    pub(crate) fn refresh_exhausted(&mut self) {
        self.exhausted = self.occupancy.all() && self.slots.len() >= self.config.max_slots;
    }

    /// Whether any byte gap exists before the highest live entry
    pub(crate) fn has_holes(&self) -> bool {
        let mut cursor = 0;
        for index in self.occupancy.iter_ones() {
            let slot = &self.slots[index];
            if slot.offset != cursor {
                return true;
            }
            cursor = slot.end();
        }
        false
    }

    pub(crate) fn track(&mut self, update: impl FnOnce(&mut Counters)) {
        if self.config.track_stats {
            update(&mut self.counters);
        }
    }
}

impl core::fmt::Debug for Pool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("free_bytes", &self.free_bytes)
            .field("live_entries", &self.live_entries())
            .field("slot_capacity", &self.slots.len())
            .field("fragmented", &self.fragmented)
            .field("exhausted", &self.exhausted)
            .field("access_count", &self.access_count)
            .finish()
    }
}
