//! Follower-side apply path.

use std::sync::Arc;

use tracing::debug;

use crate::error::ApplyError;
use crate::record::Record;
use crate::store::{ApplyOutcome, RecordStore};

/// Applies replicated records to a follower's local store.
///
/// Delivery is at-least-once, so duplicates and late, older records are
/// normal traffic: both are reported as [`ApplyOutcome::Ignored`], which the
/// leader still counts as an acknowledgment.
pub struct ApplyEngine {
    store: Arc<RecordStore>,
}

impl ApplyEngine {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn apply(&self, record: &Record) -> Result<ApplyOutcome, ApplyError> {
        record.validate()?;
        let outcome = self.store.apply(record);
        match outcome {
            ApplyOutcome::Applied => {
                debug!(key = %record.key, version = record.version, "applied record");
            }
            ApplyOutcome::Ignored => {
                debug!(
                    key = %record.key,
                    version = record.version,
                    stored = self.store.version_of(&record.key),
                    "ignored stale or duplicate record"
                );
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ApplyEngine {
        ApplyEngine::new(Arc::new(RecordStore::new()))
    }

    #[test]
    fn second_delivery_of_same_record_is_a_successful_noop() {
        let engine = engine();
        let record = Record::new("key1", "value1", 1);
        assert_eq!(engine.apply(&record), Ok(ApplyOutcome::Applied));
        let before = engine.store().snapshot();

        assert_eq!(engine.apply(&record), Ok(ApplyOutcome::Ignored));
        assert_eq!(engine.store().snapshot(), before);
    }

    #[test]
    fn reordered_delivery_keeps_newest() {
        let engine = engine();
        engine.apply(&Record::new("k", "v2", 2)).unwrap();
        assert_eq!(
            engine.apply(&Record::new("k", "v1", 1)),
            Ok(ApplyOutcome::Ignored)
        );
        assert_eq!(engine.store().get("k").unwrap().value, "v2");
    }

    #[test]
    fn malformed_records_are_rejected_without_touching_state() {
        let engine = engine();
        assert_eq!(
            engine.apply(&Record::new("", "v", 1)),
            Err(ApplyError::EmptyKey)
        );
        assert!(engine.apply(&Record::new("k", "v", 0)).is_err());
        assert!(engine.store().is_empty());
    }
}
