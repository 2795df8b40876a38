//! Per-key guarded lock: a stamped shared/exclusive lock composed with a
//! counting barrier.
//!
//! Normal acquisitions wait for the barrier to reach zero before touching
//! the underlying lock, so a raised barrier stalls every newcomer on the
//! key. The upgrade path raises the barrier and then goes directly to the
//! underlying lock: it is the cause of the barrier being up and must not
//! wait on it. The barrier stays raised for the whole upgrade chain and is
//! lowered only when the downgraded shared acquisition is finally released.

use crate::barrier::CountingBarrier;
use crate::error::Result;
use crate::stamped::StampedLock;
use tracing::trace;

/// One key's lock: stamped shared/exclusive primitive plus its barrier.
#[derive(Debug, Default)]
pub struct GuardedLock {
    lock: StampedLock,
    barrier: CountingBarrier,
}

impl GuardedLock {
    /// Create an unlocked guarded lock with a zeroed barrier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire shared mode once the barrier is down.
    pub fn acquire_read(&self) -> Result<u64> {
        self.barrier.wait_until_zero()?;
        let stamp = self.lock.read()?;
        trace!(stamp, "acquired read");
        Ok(stamp)
    }

    /// Acquire exclusive mode once the barrier is down.
    pub fn acquire_write(&self) -> Result<u64> {
        self.barrier.wait_until_zero()?;
        let stamp = self.lock.write()?;
        trace!(stamp, "acquired write");
        Ok(stamp)
    }

    /// Release a shared acquisition.
    ///
    /// When the acquisition came from a downgrade, this is the end of an
    /// upgrade chain: the matching barrier raise is lowered here, re-enabling
    /// acquisitions stalled on this key.
    pub fn release_read(&self, stamp: u64, came_from_downgrade: bool) -> Result<()> {
        self.lock.unlock_read(stamp)?;
        trace!(stamp, came_from_downgrade, "released read");
        if came_from_downgrade {
            self.barrier.lower_or_wait()?;
        }
        Ok(())
    }

    /// Release an exclusive acquisition. An exclusive acquisition that was
    /// not reached via upgrade has no outstanding barrier raise to clear.
    pub fn release_write(&self, stamp: u64) -> Result<()> {
        self.lock.unlock_write(stamp)?;
        trace!(stamp, "released write");
        Ok(())
    }

    /// Upgrade a shared acquisition to an exclusive one.
    ///
    /// Raises the barrier first (stalling every other context's future
    /// acquisitions on this key), then releases the shared acquisition and
    /// takes exclusive mode directly against the underlying lock.
    pub fn upgrade(&self, stamp: u64) -> Result<u64> {
        self.barrier.raise()?;
        self.lock.unlock_read(stamp)?;
        let write_stamp = self.lock.write()?;
        trace!(stamp, write_stamp, "upgraded read to write");
        Ok(write_stamp)
    }

    /// Downgrade an exclusive acquisition back to a shared one in place.
    ///
    /// The barrier is untouched; it is cleared later, when the shared
    /// acquisition is released via `release_read(.., true)`.
    pub fn downgrade(&self, stamp: u64) -> Result<u64> {
        let read_stamp = self.lock.convert_to_read(stamp)?;
        trace!(stamp, read_stamp, "downgraded write to read");
        Ok(read_stamp)
    }

    /// Is this key currently held in exclusive mode by anyone?
    pub fn is_write_locked(&self) -> Result<bool> {
        self.lock.is_write_locked()
    }

    /// Number of live shared holders (diagnostics).
    pub fn reader_count(&self) -> Result<usize> {
        self.lock.reader_count()
    }

    /// Current barrier count (diagnostics).
    pub fn barrier_count(&self) -> Result<u64> {
        self.barrier.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockError;
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn plain_write_never_touches_the_barrier() {
        let lock = GuardedLock::new();
        let stamp = lock.acquire_write().unwrap();
        assert_eq!(lock.barrier_count().unwrap(), 0);
        lock.release_write(stamp).unwrap();
        assert_eq!(lock.barrier_count().unwrap(), 0);
    }

    #[test]
    fn upgrade_raises_and_final_release_lowers() {
        let lock = GuardedLock::new();
        let read_stamp = lock.acquire_read().unwrap();

        let write_stamp = lock.upgrade(read_stamp).unwrap();
        assert_eq!(lock.barrier_count().unwrap(), 1);
        assert!(lock.is_write_locked().unwrap());

        let read_again = lock.downgrade(write_stamp).unwrap();
        // Downgrade leaves the barrier up.
        assert_eq!(lock.barrier_count().unwrap(), 1);
        assert!(!lock.is_write_locked().unwrap());

        lock.release_read(read_again, true).unwrap();
        assert_eq!(lock.barrier_count().unwrap(), 0);
        assert_eq!(lock.reader_count().unwrap(), 0);
    }

    #[test]
    fn raised_barrier_stalls_new_acquisitions() {
        let lock = Arc::new(GuardedLock::new());
        let read_stamp = lock.acquire_read().unwrap();
        let write_stamp = lock.upgrade(read_stamp).unwrap();
        let read_after_downgrade = lock.downgrade(write_stamp).unwrap();
        // Key is only share-locked now, but the barrier is still up: a
        // newcomer's read must not complete yet.
        let (tx, rx) = mpsc::channel();
        let newcomer = {
            let lock = Arc::clone(&lock);
            std::thread::spawn(move || {
                let s = lock.acquire_read().unwrap();
                tx.send(()).unwrap();
                lock.release_read(s, false).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        lock.release_read(read_after_downgrade, true).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        newcomer.join().unwrap();
    }

    #[test]
    fn downgrade_requires_the_live_write_stamp() {
        let lock = GuardedLock::new();
        let stamp = lock.acquire_read().unwrap();
        let err = lock.downgrade(stamp).unwrap_err();
        assert!(matches!(err, LockError::InvalidStamp { .. }));
        lock.release_read(stamp, false).unwrap();
    }
}
