//! Counting barrier used to stall new lock acquisitions while an upgrade
//! chain is outstanding.
//!
//! The count is the number of raised-but-not-yet-lowered upgrade chains on
//! one key. While it is non-zero, fresh acquisitions on that key wait in
//! [`CountingBarrier::wait_until_zero`]; the upgrade/downgrade path itself
//! never waits on the barrier it raised.

use crate::error::{LockError, Result};
use std::sync::{Condvar, Mutex};

/// A blockable non-negative counter.
///
/// `raise` and `lower_or_wait` must be paired by the caller: `lower_or_wait`
/// is only ever invoked when a matching `raise` already happened, so its
/// wait-while-zero branch is a defensive guard rather than an expected path.
#[derive(Debug, Default)]
pub struct CountingBarrier {
    count: Mutex<u64>,
    cond: Condvar,
}

impl CountingBarrier {
    /// Create a barrier with a count of zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the count and wake all waiters.
    pub fn raise(&self) -> Result<()> {
        let mut count = self
            .count
            .lock()
            .map_err(|_| LockError::poisoned("barrier"))?;
        *count += 1;
        self.cond.notify_all();
        Ok(())
    }

    /// Decrement the count, waiting first if it is currently zero, then wake
    /// all waiters.
    pub fn lower_or_wait(&self) -> Result<()> {
        let mut count = self
            .count
            .lock()
            .map_err(|_| LockError::poisoned("barrier"))?;
        while *count == 0 {
            count = self
                .cond
                .wait(count)
                .map_err(|_| LockError::poisoned("barrier"))?;
        }
        *count -= 1;
        self.cond.notify_all();
        Ok(())
    }

    /// Block until the count is zero. Does not mutate the count.
    pub fn wait_until_zero(&self) -> Result<()> {
        let mut count = self
            .count
            .lock()
            .map_err(|_| LockError::poisoned("barrier"))?;
        while *count != 0 {
            count = self
                .cond
                .wait(count)
                .map_err(|_| LockError::poisoned("barrier"))?;
        }
        Ok(())
    }

    /// Current count (diagnostics and tests).
    pub fn count(&self) -> Result<u64> {
        self.count
            .lock()
            .map(|c| *c)
            .map_err(|_| LockError::poisoned("barrier"))
    }
}
