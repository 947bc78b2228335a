//! # nebula-suballoc
//!
//! Compacting sub-allocator for relocatable entries inside fixed-capacity
//! byte buffers.
//!
//! A [`Pool`] carves variably-sized entries out of one externally owned
//! buffer. Entries can later be moved, either by compacting the pool in
//! place or by transferring them into another pool, and every caller-held
//! [`Handle`] keeps resolving to its entry's current slot.
//!
//! ## Quick Start
//!
//! ```rust
//! use nebula_suballoc::prelude::*;
//!
//! let mut memory = vec![0u8; 1024];
//! let mut pool = Pool::new(1024, 16)?;
//! let mut pool = pool.map(&mut memory)?;
//!
//! let a = pool.allocate(300).expect("fits");
//! let b = pool.allocate(300).expect("fits");
//! pool.bytes_mut(&b).expect("mapped").fill(0x42);
//! pool.free(a);
//!
//! // Entries slide down; `b` follows.
//! pool.defragment(0);
//! assert_eq!(pool.offset_of(&b), Some(0));
//! assert!(pool.bytes(&b).expect("mapped").iter().all(|&x| x == 0x42));
//! # Ok::<(), MemoryError>(())
//! ```
//!
//! ## Features
//!
//! - `guard` (default): [`GuardedPool`], a decorator that surrounds entries
//!   with guard bytes and checks them
//!
//! ## Threading
//!
//! Pools and handles are single-threaded (`!Send`, `!Sync`). Callers
//! serialize access to a pool and to both pools of a transfer.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(rust_2018_idioms)]
#![allow(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
// Slot indices are bounded by `max_slots`, which fits in u32
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::double_must_use)]
#![allow(clippy::return_self_not_must_use)]

pub mod config;
pub mod error;
#[cfg(feature = "guard")]
#[cfg_attr(docsrs, doc(cfg(feature = "guard")))]
pub mod guard;
pub mod handle;
pub mod manager;
pub mod pool;
pub mod stats;

pub use crate::config::{ManagerConfig, PoolConfig};
pub use crate::error::{MemoryError, MemoryResult, Result};
#[cfg(feature = "guard")]
pub use crate::guard::GuardedPool;
pub use crate::handle::{Handle, PoolId};
pub use crate::manager::PoolManager;
pub use crate::pool::{Compaction, Mapping, Pool, PoolDump};
pub use crate::stats::{ManagerStats, PoolStats};

pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::config::{ManagerConfig, PoolConfig};
    pub use crate::error::{MemoryError, MemoryResult};
    #[cfg(feature = "guard")]
    pub use crate::guard::GuardedPool;
    pub use crate::handle::{Handle, PoolId};
    pub use crate::manager::PoolManager;
    pub use crate::pool::{Compaction, Mapping, Pool};
    pub use crate::stats::{ManagerStats, PoolStats};
}
