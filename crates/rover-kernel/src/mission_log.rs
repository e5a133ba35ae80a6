//! [`MissionLog`] – bounded operator-facing event history.
//!
//! Safety stops, mode changes, and perception decisions are appended here so
//! the external status surface can show what the rover has been doing.  The
//! log keeps the most recent entries only; the oldest is evicted first.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Default number of retained entries.
pub const DEFAULT_CAPACITY: usize = 200;

/// One line of the mission log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionEntry {
    pub time: DateTime<Utc>,
    /// Subsystem that produced the entry, e.g. `"tactical"` or `"arbiter"`.
    pub source: String,
    pub message: String,
}

impl fmt::Display for MissionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.time.format("%H:%M:%S"),
            self.source,
            self.message
        )
    }
}

/// Shared, bounded mission log.  Clones share the same underlying buffer.
#[derive(Clone, Debug)]
pub struct MissionLog {
    inner: Arc<Mutex<VecDeque<MissionEntry>>>,
    capacity: usize,
}

impl Default for MissionLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MissionLog {
    /// Create a log retaining at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Append an entry, evicting the oldest when full.
    pub fn append(&self, source: &str, message: impl Into<String>) {
        let entry = MissionEntry {
            time: Utc::now(),
            source: source.to_string(),
            message: message.into(),
        };
        info!(target: "mission", source = %entry.source, "{}", entry.message);

        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The newest `count` entries, oldest first.
    pub fn tail(&self, count: usize) -> Vec<MissionEntry> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<MissionEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
