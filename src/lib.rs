//! Keylock: key-addressed read/write locks with in-place upgrade and
//! downgrade.
//!
//! A [`LockRegistry`] hands out one shared/exclusive lock per key, created
//! lazily and kept for the registry's lifetime. Guarded calls wrap an
//! operation with a key set and a mode:
//!
//! ```
//! use keylock::LockRegistry;
//!
//! let registry: LockRegistry = LockRegistry::new();
//! let _balance = registry.with_read(&[1, 2], || 42)?;
//! registry.with_write(&[1], || { /* mutate resource 1 */ })?;
//! # Ok::<(), keylock::LockError>(())
//! ```
//!
//! Reentrancy is tracked per calling context (per thread): a nested call on
//! keys the context already holds skips them, and a nested write request on
//! a key the context read-holds upgrades the lock in place instead of
//! deadlocking against itself. While such an upgrade chain is outstanding,
//! a per-key counting barrier stalls every other context's new acquisitions
//! on that key until the chain fully unwinds, trading throughput for
//! consistency.
//!
//! Multi-key calls acquire in request order (deduplicated) and release in
//! reverse order on every exit path. Key sets are not canonically sorted;
//! see the [`registry`] module docs for the hazards that follow.

pub mod barrier;
pub mod context;
pub mod error;
pub mod events;
pub mod guarded;
pub mod registry;
pub mod stamped;

pub use context::ContextId;
pub use error::{LockError, Result};
pub use events::{EventAction, EventSink, LockEvent, MemorySink, NdjsonSink};
pub use guarded::GuardedLock;
pub use registry::{HoldState, KeyInfo, KeyStateView, LockRegistry};
