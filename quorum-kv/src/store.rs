//! In-memory record storage used by the leader and by every follower.
//!
//! Each replica owns exactly one [`RecordStore`]. Writes go through
//! [`RecordStore::apply`], which compares versions instead of overwriting
//! blindly, so a replica never moves a key backwards no matter how often or
//! in which order records arrive.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::record::{Record, Version, VersionedValue};

/// Result of offering a record to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The record was newer than anything stored and replaced it.
    Applied,
    /// The store already held this version or a newer one.
    Ignored,
}

/// Thread-safe key to (value, version) map.
///
/// BTreeMap keeps iteration deterministic, which makes status output and
/// test assertions stable.
#[derive(Default)]
pub struct RecordStore {
    data: Mutex<BTreeMap<String, VersionedValue>>,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self) -> MutexGuard<'_, BTreeMap<String, VersionedValue>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `record` if it is strictly newer than the current entry for its key.
    ///
    /// The comparison and the insert happen under one lock, so two racing
    /// applies for the same key always leave the higher version in place.
    pub fn apply(&self, record: &Record) -> ApplyOutcome {
        let mut data = self.data();
        match data.get_mut(&record.key) {
            Some(stored) if !record.supersedes(stored.version) => ApplyOutcome::Ignored,
            Some(stored) => {
                *stored = VersionedValue::from(record);
                ApplyOutcome::Applied
            }
            None => {
                data.insert(record.key.clone(), VersionedValue::from(record));
                ApplyOutcome::Applied
            }
        }
    }

    /// Returns the current entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<VersionedValue> {
        self.data().get(key).cloned()
    }

    /// Version stored for `key`, or 0 when the key is unknown.
    pub fn version_of(&self, key: &str) -> Version {
        self.data().get(key).map_or(0, |stored| stored.version)
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Clones the whole map so callers can iterate without holding the lock.
    pub fn snapshot(&self) -> BTreeMap<String, VersionedValue> {
        self.data().clone()
    }
}
