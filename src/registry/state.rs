//! Per-key, per-context lock state.
//!
//! Each key owns one [`GuardedLock`] plus a table of acquisition records,
//! one per calling context currently holding the key. A record remembers the
//! stamp of the live acquisition and whether that acquisition was reached
//! via upgrade or via downgrade; those two flags drive release behavior.
//!
//! A record is only ever created, replaced, or removed by its owning
//! context, so the table mutex is held for map access only, never across a
//! blocking lock operation.

use crate::context::ContextId;
use crate::error::{LockError, Result};
use crate::guarded::GuardedLock;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Derived lock state of one (context, key) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldState {
    /// The context holds no acquisition on the key.
    Unlocked,
    /// The context holds a shared acquisition.
    ReadLocked,
    /// The context holds the exclusive acquisition.
    WriteLocked,
}

/// Observable state of a key across all contexts (diagnostics).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStateView {
    /// No holder.
    Unlocked,
    /// `n` shared holders.
    Shared(usize),
    /// One exclusive holder.
    Exclusive,
}

/// How an exclusive acquisition was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteAcquired {
    /// Straight exclusive acquisition; no barrier involvement.
    Fresh,
    /// In-place upgrade from a shared acquisition; the barrier is now up.
    Upgraded,
}

/// How an exclusive release resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteReleased {
    /// Fully released; the record is gone.
    Released,
    /// Downgraded in place; the context still holds the key in shared mode.
    Downgraded,
}

#[derive(Debug, Clone, Copy)]
struct Acquisition {
    stamp: u64,
    via_upgrade: bool,
    via_downgrade: bool,
}

/// One key's guarded lock and its per-context acquisition records.
#[derive(Debug, Default)]
pub(crate) struct KeyState {
    lock: GuardedLock,
    holders: Mutex<HashMap<ContextId, Acquisition>>,
}

impl KeyState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn holders(&self) -> Result<MutexGuard<'_, HashMap<ContextId, Acquisition>>> {
        self.holders
            .lock()
            .map_err(|_| LockError::poisoned("holder table"))
    }

    fn record_for(&self, ctx: ContextId) -> Result<Option<Acquisition>> {
        Ok(self.holders()?.get(&ctx).copied())
    }

    /// Acquire shared mode for `ctx` and store a fresh record.
    pub(crate) fn allocate_read(&self, ctx: ContextId) -> Result<()> {
        let stamp = self.lock.acquire_read()?;
        self.holders()?.insert(
            ctx,
            Acquisition {
                stamp,
                via_upgrade: false,
                via_downgrade: false,
            },
        );
        Ok(())
    }

    /// Acquire exclusive mode for `ctx`.
    ///
    /// If `ctx` currently holds the key in shared mode this is an in-place
    /// upgrade: the barrier goes up and the record is replaced with one
    /// flagged `via_upgrade`. Otherwise it is a plain exclusive acquisition.
    pub(crate) fn allocate_write(&self, ctx: ContextId) -> Result<WriteAcquired> {
        if self.current_state(ctx)? == HoldState::ReadLocked {
            let record = self.record_for(ctx)?.ok_or(LockError::NotHeld)?;
            let stamp = self.lock.upgrade(record.stamp)?;
            self.holders()?.insert(
                ctx,
                Acquisition {
                    stamp,
                    via_upgrade: true,
                    via_downgrade: false,
                },
            );
            Ok(WriteAcquired::Upgraded)
        } else {
            let stamp = self.lock.acquire_write()?;
            self.holders()?.insert(
                ctx,
                Acquisition {
                    stamp,
                    via_upgrade: false,
                    via_downgrade: false,
                },
            );
            Ok(WriteAcquired::Fresh)
        }
    }

    /// Release the shared acquisition held by `ctx` and drop its record.
    ///
    /// Returns true when the acquisition came from a downgrade, i.e. the
    /// release also lowered the key's barrier.
    pub(crate) fn unlock_read(&self, ctx: ContextId) -> Result<bool> {
        let record = self.record_for(ctx)?.ok_or(LockError::NotHeld)?;
        self.lock.release_read(record.stamp, record.via_downgrade)?;
        self.holders()?.remove(&ctx);
        Ok(record.via_downgrade)
    }

    /// Release the exclusive acquisition held by `ctx`.
    ///
    /// An acquisition that came from an upgrade is downgraded in place: the
    /// context keeps the key in shared mode and the record is replaced with
    /// one flagged `via_downgrade`. The barrier stays up until that shared
    /// acquisition is finally released.
    pub(crate) fn unlock_write(&self, ctx: ContextId) -> Result<WriteReleased> {
        let record = self.record_for(ctx)?.ok_or(LockError::NotHeld)?;
        if record.via_upgrade {
            let stamp = self.lock.downgrade(record.stamp)?;
            self.holders()?.insert(
                ctx,
                Acquisition {
                    stamp,
                    via_upgrade: false,
                    via_downgrade: true,
                },
            );
            Ok(WriteReleased::Downgraded)
        } else {
            self.lock.release_write(record.stamp)?;
            self.holders()?.remove(&ctx);
            Ok(WriteReleased::Released)
        }
    }

    /// Derived state of this key for `ctx`.
    ///
    /// A context with a record holds either shared or exclusive mode; which
    /// one is disambiguated by asking the lock whether anyone holds it
    /// exclusively. If someone does while we have a record, it is us: a
    /// record in shared mode excludes every other exclusive holder.
    pub(crate) fn current_state(&self, ctx: ContextId) -> Result<HoldState> {
        if self.holders()?.contains_key(&ctx) {
            if self.lock.is_write_locked()? {
                Ok(HoldState::WriteLocked)
            } else {
                Ok(HoldState::ReadLocked)
            }
        } else {
            Ok(HoldState::Unlocked)
        }
    }

    /// Observable state across all contexts (diagnostics).
    pub(crate) fn view(&self) -> Result<KeyStateView> {
        if self.lock.is_write_locked()? {
            Ok(KeyStateView::Exclusive)
        } else {
            match self.lock.reader_count()? {
                0 => Ok(KeyStateView::Unlocked),
                n => Ok(KeyStateView::Shared(n)),
            }
        }
    }

    /// Current barrier count for this key (diagnostics).
    pub(crate) fn barrier_count(&self) -> Result<u64> {
        self.lock.barrier_count()
    }

    /// Poison the holder table by panicking a thread that holds its mutex.
    /// Lets tests exercise the unrecoverable-wait error path.
    #[cfg(test)]
    pub(crate) fn poison_holders(&self) {
        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = self.holders.lock().unwrap();
                    panic!("poisoning holder table for test");
                })
                .join();
        });
    }
}

impl std::fmt::Display for KeyStateView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyStateView::Unlocked => write!(f, "unlocked"),
            KeyStateView::Shared(n) => write!(f, "shared({})", n),
            KeyStateView::Exclusive => write!(f, "exclusive"),
        }
    }
}
