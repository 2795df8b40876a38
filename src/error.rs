//! Error types for keylock.
//!
//! Uses thiserror for derive macros. Lock-acquisition failures are never
//! swallowed: they abort the enclosing guarded call. Failures from the
//! wrapped operation are not represented here at all; they flow back to the
//! caller as the operation's own return value.

use thiserror::Error;

/// Main error type for lock operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// A blocking wait could not complete because the mutex protecting the
    /// lock state was poisoned (a holder panicked mid-operation).
    ///
    /// This is unrecoverable for the current guarded call. Locks acquired
    /// earlier in the same call are left held; the registry does not roll
    /// back prior acquisitions when a later one fails.
    #[error("lock wait aborted: {0}")]
    Poisoned(String),

    /// A stamp passed to a release or convert operation does not identify a
    /// live acquisition on that lock. This is a programming-contract
    /// violation, not a recoverable condition.
    #[error("stamp {stamp} does not identify a live {mode} acquisition")]
    InvalidStamp {
        /// The offending stamp value.
        stamp: u64,
        /// The mode the stamp was expected to name ("read" or "write").
        mode: &'static str,
    },

    /// An unlock or downgrade was requested by a context that holds no
    /// acquisition record for the key. Contract violation.
    #[error("calling context holds no lock on this key")]
    NotHeld,

    /// Appending to an NDJSON event log failed.
    #[error("event log append failed: {0}")]
    EventLog(String),
}

/// Result type alias for keylock operations.
pub type Result<T> = std::result::Result<T, LockError>;

impl LockError {
    /// Shorthand for the poisoned-mutex case; used wherever a `lock()` or
    /// condvar wait surfaces a `PoisonError`.
    pub(crate) fn poisoned(what: &str) -> Self {
        LockError::Poisoned(format!("{} mutex poisoned", what))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_stamp_message_names_mode_and_value() {
        let err = LockError::InvalidStamp {
            stamp: 42,
            mode: "read",
        };
        assert_eq!(
            err.to_string(),
            "stamp 42 does not identify a live read acquisition"
        );
    }

    #[test]
    fn poisoned_message_names_the_mutex() {
        let err = LockError::poisoned("barrier");
        assert_eq!(err.to_string(), "lock wait aborted: barrier mutex poisoned");
    }

    #[test]
    fn not_held_message_is_descriptive() {
        assert_eq!(
            LockError::NotHeld.to_string(),
            "calling context holds no lock on this key"
        );
    }
}
