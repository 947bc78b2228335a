//! Consistency checks and state dumps

use core::fmt;

use super::Pool;
use crate::error::{MemoryError, MemoryResult};
use crate::handle::Location;

const COMPONENT: &str = "pool";

impl Pool {
    /// Verifies every structural invariant of the pool
    ///
    /// Checks the bitmap against the slot table, every owner's location,
    /// ordering, disjointness and bounds of live entries, byte
    /// conservation, the fragmentation flag and the session state.
    pub fn validate(&self) -> MemoryResult<()> {
        let corrupt = |details: String| Err(MemoryError::corruption(COMPONENT, &details));

        if self.slots.len() != self.occupancy.len() {
            return corrupt(format!(
                "{}: {} slots but {} occupancy bits",
                self.id,
                self.slots.len(),
                self.occupancy.len()
            ));
        }

        let mut cursor = 0;
        let mut used = 0;
        let mut holes = false;
        for (index, slot) in self.slots.iter().enumerate() {
            let live = self.occupancy[index];
            let Some(owner) = &slot.owner else {
                if live {
                    return corrupt(format!("{}: live slot {index} has no owner", self.id));
                }
                continue;
            };
            if !live {
                return corrupt(format!("{}: free slot {index} still has an owner", self.id));
            }

            let expected = Location {
                pool: Some(self.id),
                slot: index as u32,
            };
            if owner.get() != expected {
                return corrupt(format!(
                    "{}: slot {index} owner points at {:?}",
                    self.id,
                    owner.get()
                ));
            }
            if slot.size == 0 {
                return corrupt(format!("{}: slot {index} is empty", self.id));
            }
            if slot.offset < cursor {
                return corrupt(format!(
                    "{}: slot {index} at {} overlaps or precedes {cursor}",
                    self.id, slot.offset
                ));
            }
            if slot.end() > self.capacity {
                return corrupt(format!(
                    "{}: slot {index} ends at {} past capacity {}",
                    self.id,
                    slot.end(),
                    self.capacity
                ));
            }

            holes |= slot.offset != cursor;
            cursor = slot.end();
            used += slot.size;
        }

        if used + self.free_bytes != self.capacity {
            return corrupt(format!(
                "{}: {used} used + {} free != capacity {}",
                self.id, self.free_bytes, self.capacity
            ));
        }
        if holes && !self.fragmented {
            return corrupt(format!("{}: holes present but not flagged fragmented", self.id));
        }
        if self.exhausted && !self.occupancy.all() {
            return corrupt(format!("{}: exhausted with a free slot index", self.id));
        }
        if self.base.is_some() != (self.access_count > 0) {
            return corrupt(format!(
                "{}: base {:?} with {} open sessions",
                self.id, self.base, self.access_count
            ));
        }
        Ok(())
    }

    /// Panics in debug builds if the pool is inconsistent
    #[inline]
    pub(crate) fn debug_validate(&self) {
        #[cfg(debug_assertions)]
        if let Err(err) = self.validate() {
            panic!("{err}\n{}", self.dump());
        }
    }

    /// Full-state dump for diagnostics
    pub fn dump(&self) -> PoolDump<'_> {
        PoolDump { pool: self }
    }
}

/// Display adapter returned by [`Pool::dump`]
pub struct PoolDump<'a> {
    pool: &'a Pool,
}

impl fmt::Display for PoolDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pool = self.pool;
        writeln!(
            f,
            "{}: capacity={} free={} slots={} fragmented={} exhausted={} sessions={}",
            pool.id,
            pool.capacity,
            pool.free_bytes,
            pool.slots.len(),
            pool.fragmented,
            pool.exhausted,
            pool.access_count
        )?;
        for index in pool.occupancy.iter_ones() {
            let slot = &pool.slots[index];
            writeln!(
                f,
                "  [{index:>4}] {:>8}..{:<8} ({} bytes)",
                slot.offset,
                slot.end(),
                slot.size
            )?;
        }
        Ok(())
    }
}

impl fmt::Debug for PoolDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
