//! Lock event instrumentation.
//!
//! The registry can record every acquire, release, upgrade, and downgrade it
//! performs. Events carry a timestamp, the key, and the calling context, so
//! a consumer can check ordering properties after the fact (for example,
//! that no acquisition on a key completed while that key's upgrade chain was
//! outstanding).
//!
//! # Event Format
//!
//! The file sink appends NDJSON (one JSON object per line):
//! - `ts`: RFC3339 timestamp
//! - `action`: the lock operation performed
//! - `key`: the lock key, rendered with `Debug`
//! - `context`: the calling context id
//!
//! Recording failures never turn into lock failures; the registry logs them
//! and carries on.

use crate::error::{LockError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Lock operations that can be recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Shared acquisition completed.
    AcquireRead,
    /// Exclusive acquisition completed (not via upgrade).
    AcquireWrite,
    /// Shared acquisition upgraded to exclusive; the key's barrier is up.
    Upgrade,
    /// Exclusive acquisition downgraded back to shared; barrier still up.
    Downgrade,
    /// Shared acquisition released.
    ReleaseRead,
    /// Final release of a downgraded acquisition; the barrier came down.
    BarrierLowered,
    /// Exclusive acquisition released.
    ReleaseWrite,
}

/// One recorded lock operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
    /// When the operation completed (RFC3339).
    pub ts: DateTime<Utc>,

    /// The operation performed.
    pub action: EventAction,

    /// The lock key, rendered with `Debug`.
    pub key: String,

    /// The calling context id.
    pub context: u64,
}

impl LockEvent {
    /// Create an event timestamped now.
    pub fn new(action: EventAction, key: String, context: u64) -> Self {
        Self {
            ts: Utc::now(),
            action,
            key,
            context,
        }
    }
}

/// Destination for recorded lock events.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: LockEvent) -> Result<()>;
}

/// In-memory sink; the natural choice for tests and diagnostics.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<LockEvent>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, in record order.
    pub fn events(&self) -> Vec<LockEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: LockEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| LockError::poisoned("event sink"))?
            .push(event);
        Ok(())
    }
}

/// File-backed sink appending NDJSON, one event per line.
#[derive(Debug)]
pub struct NdjsonSink {
    path: PathBuf,
    // Serializes appends so lines from concurrent contexts never interleave.
    write_lock: Mutex<()>,
}

impl NdjsonSink {
    /// Create a sink appending to `path`. The file is created on first
    /// record if it does not exist.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// The log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for NdjsonSink {
    fn record(&self, event: LockEvent) -> Result<()> {
        let line = serde_json::to_string(&event)
            .map_err(|e| LockError::EventLog(format!("failed to serialize event: {}", e)))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| LockError::poisoned("event sink"))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                LockError::EventLog(format!(
                    "failed to open event log '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        writeln!(file, "{}", line).map_err(|e| {
            LockError::EventLog(format!(
                "failed to append to event log '{}': {}",
                self.path.display(),
                e
            ))
        })
    }
}
