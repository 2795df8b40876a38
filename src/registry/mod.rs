//! Lock registry and guarded-call orchestration.
//!
//! The registry maps keys to their guarded locks, creating them lazily on
//! first reference and retaining them for its lifetime. A guarded call
//! supplies an ordered key set (repeats allowed), a mode, and the operation
//! to run; the registry deduplicates the keys, decides per key whether the
//! calling context must acquire, skip, or upgrade, runs the operation, and
//! releases everything it acquired in reverse order on every exit path.
//!
//! # Skip Rules
//!
//! - Read path: a key already held by this context (in either mode) is
//!   skipped; only `Unlocked` keys are acquired.
//! - Write path: only a key already write-locked by this context is skipped;
//!   a key held in shared mode goes through the in-place upgrade.
//!
//! # Known Hazards
//!
//! Key sets are not canonically ordered. Two call sites requesting
//! overlapping sets in different orders can deadlock each other; callers own
//! key ordering discipline. Likewise, when a second or later key's
//! acquisition fails, keys acquired earlier in the same call stay held.

mod state;


pub use state::{HoldState, KeyStateView};

use crate::context::ContextId;
use crate::error::{LockError, Result};
use crate::events::{EventAction, EventSink, LockEvent};
use state::{KeyState, WriteAcquired, WriteReleased};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Requested access mode for a guarded call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Read,
    Write,
}

/// Diagnostic view of one registered key.
#[derive(Debug, Clone)]
pub struct KeyInfo<K> {
    /// The lock key.
    pub key: K,

    /// Observable lock state across all contexts.
    pub state: KeyStateView,

    /// Outstanding upgrade chains on this key.
    pub barrier_count: u64,
}

impl<K: fmt::Debug> fmt::Display for KeyInfo<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ({}, barrier: {})",
            self.key, self.state, self.barrier_count
        )
    }
}

/// Registry of independent, key-addressed read/write locks.
///
/// One instance scopes one lock namespace; keys requested through it share
/// nothing with keys of another instance.
pub struct LockRegistry<K = u64> {
    slots: Mutex<HashMap<K, Arc<KeyState>>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl<K> fmt::Debug for LockRegistry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("recording", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl<K> Default for LockRegistry<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            sink: None,
        }
    }
}

impl<K> LockRegistry<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// Create an empty registry with no event recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an event sink; every acquire, release, upgrade, and downgrade
    /// performed by this registry is recorded through it.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Run `op` with shared access to every key in `keys`.
    ///
    /// Keys already held by the calling context (from an outer frame of the
    /// same call chain) are skipped. Whatever `op` returns, including its
    /// own error values, flows back unchanged; the `Err` case of this
    /// function is reserved for lock failures.
    pub fn with_read<T>(&self, keys: &[K], op: impl FnOnce() -> T) -> Result<T> {
        self.run(keys, Mode::Read, op)
    }

    /// Run `op` with exclusive access to every key in `keys`.
    ///
    /// Keys the calling context already write-holds are skipped; keys it
    /// read-holds are upgraded in place, raising the key's barrier for the
    /// remainder of the chain.
    pub fn with_write<T>(&self, keys: &[K], op: impl FnOnce() -> T) -> Result<T> {
        self.run(keys, Mode::Write, op)
    }

    /// Diagnostic listing of every key the registry has ever seen, with its
    /// observable lock state and barrier count, sorted for stable output.
    pub fn snapshot(&self) -> Result<Vec<KeyInfo<K>>> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| LockError::poisoned("registry"))?;

        let mut out = Vec::with_capacity(slots.len());
        for (key, slot) in slots.iter() {
            out.push(KeyInfo {
                key: key.clone(),
                state: slot.view()?,
                barrier_count: slot.barrier_count()?,
            });
        }
        out.sort_by(|a, b| format!("{:?}", a.key).cmp(&format!("{:?}", b.key)));
        Ok(out)
    }

    fn run<T>(&self, keys: &[K], mode: Mode, op: impl FnOnce() -> T) -> Result<T> {
        let ctx = ContextId::current();
        let mut acquired: Vec<(K, Arc<KeyState>)> = Vec::new();

        for key in dedup_keys(keys) {
            let slot = self.slot(&key)?;
            let state = slot.current_state(ctx)?;
            match mode {
                Mode::Read => {
                    if state == HoldState::Unlocked {
                        // A failure here returns with the earlier keys of
                        // this call still held; there is no rollback.
                        slot.allocate_read(ctx)?;
                        self.emit(EventAction::AcquireRead, &key, ctx);
                        acquired.push((key, slot));
                    }
                }
                Mode::Write => {
                    if state != HoldState::WriteLocked {
                        match slot.allocate_write(ctx)? {
                            WriteAcquired::Upgraded => {
                                self.emit(EventAction::Upgrade, &key, ctx);
                            }
                            WriteAcquired::Fresh => {
                                self.emit(EventAction::AcquireWrite, &key, ctx);
                            }
                        }
                        acquired.push((key, slot));
                    }
                }
            }
        }

        let mut unwind_guard = ReleaseOnUnwind {
            registry: self,
            acquired: &acquired,
            ctx,
            mode,
            armed: true,
        };
        let out = op();
        unwind_guard.armed = false;
        drop(unwind_guard);

        for (key, slot) in acquired.iter().rev() {
            self.release_one(key, slot, ctx, mode)?;
        }
        Ok(out)
    }

    /// Release one acquisition made by the current call, emitting events.
    fn release_one(&self, key: &K, slot: &KeyState, ctx: ContextId, mode: Mode) -> Result<()> {
        match mode {
            Mode::Read => {
                let lowered_barrier = slot.unlock_read(ctx)?;
                self.emit(EventAction::ReleaseRead, key, ctx);
                if lowered_barrier {
                    self.emit(EventAction::BarrierLowered, key, ctx);
                }
            }
            Mode::Write => match slot.unlock_write(ctx)? {
                WriteReleased::Downgraded => self.emit(EventAction::Downgrade, key, ctx),
                WriteReleased::Released => self.emit(EventAction::ReleaseWrite, key, ctx),
            },
        }
        Ok(())
    }

    /// The slot for `key`, created on first reference. Concurrent first
    /// references race on the registry mutex; exactly one slot survives.
    fn slot(&self, key: &K) -> Result<Arc<KeyState>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| LockError::poisoned("registry"))?;
        Ok(Arc::clone(slots.entry(key.clone()).or_default()))
    }

    fn emit(&self, action: EventAction, key: &K, ctx: ContextId) {
        if let Some(sink) = &self.sink
            && let Err(e) = sink.record(LockEvent::new(action, format!("{:?}", key), ctx.as_u64()))
        {
            warn!("failed to record lock event: {}", e);
        }
    }
}

/// Collapse duplicate keys, preserving first-occurrence order.
fn dedup_keys<K: Eq + Clone>(keys: &[K]) -> Vec<K> {
    let mut out: Vec<K> = Vec::with_capacity(keys.len());
    for key in keys {
        if !out.contains(key) {
            out.push(key.clone());
        }
    }
    out
}

/// Releases a call's acquisitions in reverse order if the wrapped operation
/// unwinds. Release failures during unwind are reported to stderr rather
/// than compounded into a double panic.
struct ReleaseOnUnwind<'a, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    registry: &'a LockRegistry<K>,
    acquired: &'a [(K, Arc<KeyState>)],
    ctx: ContextId,
    mode: Mode,
    armed: bool,
}

impl<K> Drop for ReleaseOnUnwind<'_, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for (key, slot) in self.acquired.iter().rev() {
            if let Err(e) = self.registry.release_one(key, slot, self.ctx, self.mode) {
                eprintln!("Warning: failed to release lock on key {:?}: {}", key, e);
            }
        }
    }
}
