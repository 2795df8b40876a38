//! Token-based shared/exclusive lock.
//!
//! Every acquisition is named by a `u64` stamp drawn from a per-lock
//! counter. Releases and conversions validate the stamp against the set of
//! live acquisitions, so a holder always releases exactly the acquisition it
//! obtained. Three observable states: unlocked, shared (n read stamps live),
//! exclusive (one write stamp live).
//!
//! There is no fairness guarantee: wakeups go through a single condvar and
//! readers may barge ahead of a waiting writer.

use crate::error::{LockError, Result};
use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Inner {
    /// Stamp of the exclusive holder, if any.
    writer: Option<u64>,
    /// Stamps of live shared holders.
    readers: HashSet<u64>,
    next_stamp: u64,
}

impl Inner {
    fn fresh_stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }
}

/// Shared/exclusive mutual exclusion with stamp-validated release.
#[derive(Debug, Default)]
pub struct StampedLock {
    inner: Mutex<Inner>,
    cond: Condvar,
}

impl StampedLock {
    /// Create an unlocked instance.
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| LockError::poisoned("lock"))
    }

    /// Acquire shared mode, blocking while a writer holds the lock.
    pub fn read(&self) -> Result<u64> {
        let mut inner = self.locked()?;
        while inner.writer.is_some() {
            inner = self
                .cond
                .wait(inner)
                .map_err(|_| LockError::poisoned("lock"))?;
        }
        let stamp = inner.fresh_stamp();
        inner.readers.insert(stamp);
        Ok(stamp)
    }

    /// Acquire exclusive mode, blocking while any holder exists.
    pub fn write(&self) -> Result<u64> {
        let mut inner = self.locked()?;
        while inner.writer.is_some() || !inner.readers.is_empty() {
            inner = self
                .cond
                .wait(inner)
                .map_err(|_| LockError::poisoned("lock"))?;
        }
        let stamp = inner.fresh_stamp();
        inner.writer = Some(stamp);
        Ok(stamp)
    }

    /// Release the shared acquisition named by `stamp`.
    pub fn unlock_read(&self, stamp: u64) -> Result<()> {
        let mut inner = self.locked()?;
        if !inner.readers.remove(&stamp) {
            return Err(LockError::InvalidStamp {
                stamp,
                mode: "read",
            });
        }
        if inner.readers.is_empty() {
            self.cond.notify_all();
        }
        Ok(())
    }

    /// Release the exclusive acquisition named by `stamp`.
    pub fn unlock_write(&self, stamp: u64) -> Result<()> {
        let mut inner = self.locked()?;
        if inner.writer != Some(stamp) {
            return Err(LockError::InvalidStamp {
                stamp,
                mode: "write",
            });
        }
        inner.writer = None;
        self.cond.notify_all();
        Ok(())
    }

    /// Convert the exclusive acquisition named by `stamp` into a shared one.
    ///
    /// The hand-off happens under a single mutex acquisition: there is no
    /// window where the lock is observable as fully unlocked. Waiting
    /// readers are woken (they may now share); waiting writers stay blocked
    /// on the new shared holder.
    pub fn convert_to_read(&self, stamp: u64) -> Result<u64> {
        let mut inner = self.locked()?;
        if inner.writer != Some(stamp) {
            return Err(LockError::InvalidStamp {
                stamp,
                mode: "write",
            });
        }
        inner.writer = None;
        let read_stamp = inner.fresh_stamp();
        inner.readers.insert(read_stamp);
        self.cond.notify_all();
        Ok(read_stamp)
    }

    /// Is the lock currently held in exclusive mode by anyone?
    pub fn is_write_locked(&self) -> Result<bool> {
        Ok(self.locked()?.writer.is_some())
    }

    /// Number of live shared holders (diagnostics).
    pub fn reader_count(&self) -> Result<usize> {
        Ok(self.locked()?.readers.len())
    }
}
