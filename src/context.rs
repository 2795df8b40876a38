//! Calling-context identity.
//!
//! Reentrancy decisions are keyed by "which logical context is running this
//! call". For native threads that is a process-unique id handed out from a
//! global counter the first time a thread asks for it. The id is stable for
//! the thread's lifetime and never reused while the thread lives.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CONTEXT_ID: u64 = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
}

/// Identity of a calling context (one per thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    /// The identity of the current thread.
    pub fn current() -> Self {
        ContextId(CONTEXT_ID.with(|id| *id))
    }

    /// The raw id value (used in event records and diagnostics).
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}
