//! Relocatable handles
//!
//! A [`Handle`] never stores an address. It shares a small location cell
//! with the pool slot that owns it; the pool rewrites that cell whenever the
//! entry moves (compaction, transfer) and clears it on free. Resolving a
//! handle therefore always yields the entry's *current* placement.

use core::cell::Cell;
use core::fmt;
use core::num::NonZeroU32;
use core::sync::atomic::{AtomicU32, Ordering};
use std::rc::Rc;

/// Slot index stored in a cleared location.
pub const INVALID_SLOT: u32 = u32::MAX;

/// Unique identifier of a [`Pool`](crate::pool::Pool)
///
/// Uses `NonZeroU32` so `Option<PoolId>` stays four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(NonZeroU32);

impl PoolId {
    /// Generate a new process-unique pool ID
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU32 = AtomicU32::new(1);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        // Wraps only after 2^32 pools; restart from 1.
        Self(NonZeroU32::new(id).unwrap_or(NonZeroU32::MIN))
    }

    /// Raw ID value
    #[inline]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Where an entry currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    pub(crate) pool: Option<PoolId>,
    pub(crate) slot: u32,
}

impl Location {
    pub(crate) const INVALID: Self = Self {
        pool: None,
        slot: INVALID_SLOT,
    };
}

/// Back-reference from a slot to the handle it must keep up to date.
#[derive(Debug, Clone)]
pub(crate) struct Owner(Rc<Cell<Location>>);

impl Owner {
    pub(crate) fn get(&self) -> Location {
        self.0.get()
    }

    pub(crate) fn relocate(&self, pool: PoolId, slot: u32) {
        self.0.set(Location {
            pool: Some(pool),
            slot,
        });
    }

    pub(crate) fn invalidate(&self) {
        self.0.set(Location::INVALID);
    }

    pub(crate) fn is_owned_by(&self, handle: &Handle) -> bool {
        Rc::ptr_eq(&self.0, &handle.location)
    }
}

/// Caller-held reference to a pool entry
///
/// Handles are not `Clone`: each entry has exactly one. Freeing consumes the
/// handle, so a freed entry cannot be named again.
#[must_use = "dropping a handle leaks its pool entry"]
pub struct Handle {
    location: Rc<Cell<Location>>,
}

impl Handle {
    /// Create a handle bound to `slot` in `pool`, returning the slot's owner
    /// back-reference alongside it.
    pub(crate) fn bind(pool: PoolId, slot: u32) -> (Self, Owner) {
        let location = Rc::new(Cell::new(Location {
            pool: Some(pool),
            slot,
        }));
        let owner = Owner(Rc::clone(&location));
        (Self { location }, owner)
    }

    /// Pool the entry currently lives in, or `None` once freed.
    #[inline]
    pub fn pool(&self) -> Option<PoolId> {
        self.location.get().pool
    }

    /// Slot index inside the current pool, [`INVALID_SLOT`] once freed.
    #[inline]
    pub fn slot_index(&self) -> u32 {
        self.location.get().slot
    }

    /// Whether the handle still names a live entry.
    #[inline]
    pub fn is_live(&self) -> bool {
        self.pool().is_some()
    }

    pub(crate) fn location(&self) -> Location {
        self.location.get()
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self.location.get();
        f.debug_struct("Handle")
            .field("pool", &location.pool)
            .field("slot", &location.slot)
            .finish()
    }
}
