//! Access sessions over the pool's backing bytes
//!
//! # Safety
//!
//! The pool stores only a base pointer while a session is open:
//! - `open_access`: caller promises `base` is valid for reads and writes of
//!   `capacity` bytes and is not accessed elsewhere until the matching
//!   `close_access`
//! - nested sessions must reuse the same base; the pool asserts it
//! - [`Mapping`] keeps the base itself and opens a session only for the
//!   length of each call, so a pool never holds a base after the borrow of
//!   its buffer ends, even if the mapping is leaked
//!
//! Every byte-level read or write in the crate goes through
//! `Pool::require_base` or a [`Mapping`], so no entry content is touched
//! while `access_count == 0`.

use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};

use tracing::{error, trace};

use super::{Compaction, Pool};
use crate::error::{MemoryError, MemoryResult};
use crate::handle::Handle;

impl Pool {
    /// Opens (or nests) an access session over the bytes at `base`
    ///
    /// # Safety
    ///
    /// - `base` must be valid for reads and writes of `self.capacity()` bytes
    ///   until the matching [`close_access`](Self::close_access)
    /// - nothing else may access those bytes while the session is open
    /// - a nested call must pass the same `base` as the outermost one
    pub unsafe fn open_access(&mut self, base: NonNull<u8>) {
        if let Some(current) = self.base {
            assert_eq!(
                current, base,
                "{} reopened with a different base address",
                self.id
            );
        }
        self.base = Some(base);
        self.access_count += 1;
        trace!(pool = %self.id, depth = self.access_count, "access opened");
    }

    /// Closes one access session; the base is forgotten when the last one
    /// closes
    pub fn close_access(&mut self) {
        debug_assert!(self.access_count > 0, "{} closed without a session", self.id);
        self.access_count = self.access_count.saturating_sub(1);
        if self.access_count == 0 {
            self.base = None;
        }
        trace!(pool = %self.id, depth = self.access_count, "access closed");
    }

    /// Binds `memory` to the pool for the lifetime of the returned mapping
    ///
    /// Every call made through the [`Mapping`] runs inside its own access
    /// session; the pool itself stays unmapped in between.
    ///
    /// # Example
    /// ```
    /// use nebula_suballoc::Pool;
    ///
    /// let mut memory = vec![0u8; 256];
    /// let mut pool = Pool::new(256, 8).unwrap();
    /// let mut mapped = pool.map(&mut memory).unwrap();
    ///
    /// let handle = mapped.allocate(16).unwrap();
    /// mapped.bytes_mut(&handle).unwrap().fill(7);
    /// assert_eq!(mapped.bytes(&handle).unwrap(), &[7; 16]);
    /// ```
    pub fn map<'a>(&'a mut self, memory: &'a mut [u8]) -> MemoryResult<Mapping<'a>> {
        if memory.len() < self.capacity {
            return Err(MemoryError::buffer_too_small(self.capacity, memory.len()));
        }
        Ok(Mapping {
            base: NonNull::from(memory).cast::<u8>(),
            pool: self,
            _memory: PhantomData,
        })
    }

    /// Whether an access session is open
    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.access_count > 0
    }

    /// Number of nested access sessions
    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count
    }

    /// Mapped address of the entry named by `handle`
    ///
    /// Requires an open access session.
    pub fn address_of(&self, handle: &Handle) -> Option<NonNull<u8>> {
        let (offset, _) = self.span(handle)?;
        let base = self.require_base()?;
        // SAFETY: live slots lie within `[0, capacity)` of the mapped range.
        Some(unsafe { base.add(offset) })
    }

    /// Contents of the entry named by `handle`
    ///
    /// Requires an open access session.
    pub fn bytes(&self, handle: &Handle) -> Option<&[u8]> {
        let (offset, size) = self.span(handle)?;
        let base = self.require_base()?;
        // SAFETY: the session contract makes the range valid and unaliased;
        // live slots never overlap, and the borrow of `self` keeps the entry
        // from moving while the slice lives.
        Some(unsafe { core::slice::from_raw_parts(base.as_ptr().add(offset), size) })
    }

    /// Mutable contents of the entry named by `handle`
    ///
    /// Requires an open access session.
    pub fn bytes_mut(&mut self, handle: &Handle) -> Option<&mut [u8]> {
        let (offset, size) = self.span(handle)?;
        let base = self.require_base()?;
        // SAFETY: as in `bytes`; the exclusive borrow of `self` rules out any
        // other view into the pool.
        Some(unsafe { core::slice::from_raw_parts_mut(base.as_ptr().add(offset), size) })
    }

    /// Base pointer, flagging byte access without a session as misuse
    pub(crate) fn require_base(&self) -> Option<NonNull<u8>> {
        debug_assert!(self.base.is_some(), "{} accessed without a session", self.id);
        if self.base.is_none() {
            error!(pool = %self.id, "byte access without an open session");
        }
        self.base
    }

    /// Offset and size of the live entry named by `handle`
    fn span(&self, handle: &Handle) -> Option<(usize, usize)> {
        let slot = &self.slots[self.resolve(handle)?];
        Some((slot.offset, slot.size))
    }

    /// Applies the configured free pattern to `[offset, offset + len)`
    pub(crate) fn scrub(&mut self, offset: usize, len: usize) {
        let (Some(pattern), Some(base)) = (self.config.free_pattern, self.base) else {
            return;
        };
        // SAFETY: the range belonged to a live slot, so it is in bounds of
        // the mapped buffer, and no live slot overlaps it any more.
        unsafe { ptr::write_bytes(base.as_ptr().add(offset), pattern, len) };
    }
}

/// Copies `len` bytes from `from` to `to` inside one mapped range, choosing
/// an overlap-safe copy when the ranges intersect
///
/// # Safety
///
/// Both ranges must lie within the mapped buffer at `base`.
pub(crate) unsafe fn move_within(base: NonNull<u8>, from: usize, to: usize, len: usize) {
    // SAFETY: bounds are guaranteed by the caller.
    unsafe {
        let src = base.as_ptr().add(from);
        let dst = base.as_ptr().add(to);
        if from.abs_diff(to) < len {
            ptr::copy(src, dst, len);
        } else {
            ptr::copy_nonoverlapping(src, dst, len);
        }
    }
}

/// Copies `len` bytes between two distinct mapped buffers
///
/// # Safety
///
/// `src_base + from` and `dst_base + to` must each be valid for `len` bytes,
/// and the two buffers must not overlap.
pub(crate) unsafe fn copy_between(
    src_base: NonNull<u8>,
    from: usize,
    dst_base: NonNull<u8>,
    to: usize,
    len: usize,
) {
    // SAFETY: bounds and disjointness are guaranteed by the caller.
    unsafe {
        ptr::copy_nonoverlapping(src_base.as_ptr().add(from), dst_base.as_ptr().add(to), len);
    }
}

/// A pool bound to its backing buffer, returned by [`Pool::map`]
///
/// Dereferences to the pool for read-only queries. Operations that touch
/// entry bytes are forwarded, each inside an access session that closes
/// before the call returns. The mapping never hands out `&mut Pool`, so the
/// mapped pool cannot be swapped out from under the buffer borrow:
///
/// ```compile_fail
/// use nebula_suballoc::Pool;
///
/// let mut memory = vec![0u8; 64];
/// let mut pool = Pool::new(64, 4).unwrap();
/// let mut other = Pool::new(64, 4).unwrap();
/// let mut mapped = pool.map(&mut memory).unwrap();
/// core::mem::swap(&mut *mapped, &mut other);
/// ```
pub struct Mapping<'a> {
    pool: &'a mut Pool,
    base: NonNull<u8>,
    _memory: PhantomData<&'a mut [u8]>,
}

impl Mapping<'_> {
    /// See [`Pool::allocate`]
    pub fn allocate(&mut self, size: usize) -> Option<Handle> {
        self.session().allocate(size)
    }

    /// See [`Pool::allocate_with`]
    pub fn allocate_with(&mut self, size: usize, compaction: Compaction) -> Option<Handle> {
        self.session().allocate_with(size, compaction)
    }

    /// See [`Pool::free`]
    pub fn free(&mut self, handle: Handle) {
        self.session().free(handle);
    }

    /// See [`Pool::defragment`]
    pub fn defragment(&mut self, needed: usize) -> Option<u32> {
        self.session().defragment(needed)
    }

    /// See [`Pool::transfer_all_fitting`]
    pub fn transfer_all_fitting(&mut self, src: &mut Mapping<'_>) -> usize {
        let mut src = src.session();
        self.session().transfer_all_fitting(&mut src)
    }

    /// See [`Pool::transfer_best_effort`]
    pub fn transfer_best_effort(&mut self, src: &mut Mapping<'_>) -> usize {
        let mut src = src.session();
        self.session().transfer_best_effort(&mut src)
    }

    /// Mapped address of the entry named by `handle`
    pub fn address_of(&self, handle: &Handle) -> Option<NonNull<u8>> {
        let (offset, _) = self.pool.span(handle)?;
        // SAFETY: live slots lie within `[0, capacity)` of the borrowed buffer.
        Some(unsafe { self.base.add(offset) })
    }

    /// Contents of the entry named by `handle`
    pub fn bytes(&self, handle: &Handle) -> Option<&[u8]> {
        let (offset, size) = self.pool.span(handle)?;
        // SAFETY: the buffer is borrowed for the mapping's lifetime and live
        // slots never overlap; the borrow of `self` keeps the entry in place.
        Some(unsafe { core::slice::from_raw_parts(self.base.as_ptr().add(offset), size) })
    }

    /// Mutable contents of the entry named by `handle`
    pub fn bytes_mut(&mut self, handle: &Handle) -> Option<&mut [u8]> {
        let (offset, size) = self.pool.span(handle)?;
        // SAFETY: as in `bytes`, with the exclusive borrow of `self` ruling
        // out any other view into the buffer.
        Some(unsafe { core::slice::from_raw_parts_mut(self.base.as_ptr().add(offset), size) })
    }

    fn session(&mut self) -> Session<'_> {
        // SAFETY: `base` covers `capacity` bytes of the buffer this mapping
        // borrows mutably, and the session closes before that borrow ends.
        unsafe { self.pool.open_access(self.base) };
        Session { pool: &mut *self.pool }
    }
}

impl Deref for Mapping<'_> {
    type Target = Pool;

    fn deref(&self) -> &Pool {
        self.pool
    }
}

impl core::fmt::Debug for Mapping<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mapping")
            .field("pool", &self.pool)
            .field("base", &self.base)
            .finish()
    }
}

/// One open access session, closed on drop (unwinding included)
struct Session<'s> {
    pool: &'s mut Pool,
}

impl Deref for Session<'_> {
    type Target = Pool;

    fn deref(&self) -> &Pool {
        self.pool
    }
}

impl DerefMut for Session<'_> {
    fn deref_mut(&mut self) -> &mut Pool {
        self.pool
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.pool.close_access();
    }
}
