//! Guard-byte instrumentation
//!
//! [`GuardedPool`] wraps a pool's [`Mapping`] and surrounds every entry with
//! [`GUARD_SIZE`] bytes of [`GUARD_PATTERN`] on each side. The pads travel
//! with the entry through compaction and transfer, so a later
//! [`check`](GuardedPool::check) still detects writes past either end.
//!
//! ```text
//! [ guard ][ user bytes ................ ][ guard ]
//!  16 B     size                           16 B
//! ```

use crate::error::{MemoryError, MemoryResult};
use crate::handle::Handle;
use crate::pool::{Mapping, Pool};

/// Bytes of padding on each side of a guarded entry
pub const GUARD_SIZE: usize = 16;

/// Fill value of the padding
pub const GUARD_PATTERN: u8 = 0xFD;

const COMPONENT: &str = "guard";

/// Decorator adding guard bytes around every allocation of a mapped pool
pub struct GuardedPool<'p, 'm> {
    pool: &'p mut Mapping<'m>,
}

impl<'p, 'm> GuardedPool<'p, 'm> {
    /// Wraps a mapped pool
    pub fn new(pool: &'p mut Mapping<'m>) -> Self {
        Self { pool }
    }

    /// Allocates `size` user bytes plus both pads
    pub fn allocate(&mut self, size: usize) -> Option<Handle> {
        if size == 0 {
            return None;
        }
        let padded = size.checked_add(2 * GUARD_SIZE)?;
        let handle = self.pool.allocate(padded)?;

        let Some(bytes) = self.pool.bytes_mut(&handle) else {
            self.pool.free(handle);
            return None;
        };
        bytes[..GUARD_SIZE].fill(GUARD_PATTERN);
        bytes[padded - GUARD_SIZE..].fill(GUARD_PATTERN);
        Some(handle)
    }

    /// User bytes of `handle`, without the pads
    ///
    /// `None` if the entry is too small to carry pads.
    pub fn bytes(&self, handle: &Handle) -> Option<&[u8]> {
        let bytes = self.pool.bytes(handle)?;
        let end = bytes.len().checked_sub(GUARD_SIZE)?;
        bytes.get(GUARD_SIZE..end)
    }

    /// Mutable user bytes of `handle`, without the pads
    pub fn bytes_mut(&mut self, handle: &Handle) -> Option<&mut [u8]> {
        let bytes = self.pool.bytes_mut(handle)?;
        let end = bytes.len().checked_sub(GUARD_SIZE)?;
        bytes.get_mut(GUARD_SIZE..end)
    }

    /// User-visible size of `handle`
    pub fn size_of(&self, handle: &Handle) -> Option<usize> {
        self.pool.size_of(handle)?.checked_sub(2 * GUARD_SIZE)
    }

    /// Verifies both pads of `handle`
    pub fn check(&self, handle: &Handle) -> MemoryResult<()> {
        let Some(bytes) = self.pool.bytes(handle) else {
            return Err(MemoryError::corruption(
                COMPONENT,
                &format!("{handle:?} does not resolve in {}", self.pool.id()),
            ));
        };
        if bytes.len() < 2 * GUARD_SIZE {
            return Err(MemoryError::corruption(
                COMPONENT,
                &format!("{handle:?} holds {} bytes, too few for pads", bytes.len()),
            ));
        }
        let back = bytes.len() - GUARD_SIZE;

        if let Some(at) = bytes[..GUARD_SIZE].iter().position(|&b| b != GUARD_PATTERN) {
            return Err(MemoryError::corruption(
                COMPONENT,
                &format!("underrun at pad byte {at} of {handle:?}"),
            ));
        }
        if let Some(at) = bytes[back..].iter().position(|&b| b != GUARD_PATTERN) {
            return Err(MemoryError::corruption(
                COMPONENT,
                &format!("overrun at pad byte {at} of {handle:?}"),
            ));
        }
        Ok(())
    }

    /// Checks the pads, then frees the entry either way
    ///
    /// Returns the outcome of the check.
    pub fn free(&mut self, handle: Handle) -> MemoryResult<()> {
        let verdict = self.check(&handle);
        self.pool.free(handle);
        verdict
    }

    /// The wrapped pool
    pub fn pool(&self) -> &Pool {
        &**self.pool
    }

    /// The wrapped mapping, for compaction or raw access
    pub fn pool_mut(&mut self) -> &mut Mapping<'m> {
        self.pool
    }
}

impl core::fmt::Debug for GuardedPool<'_, '_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GuardedPool")
            .field("pool", &self.pool)
            .field("guard_size", &GUARD_SIZE)
            .finish()
    }
}
