//! Leader-side version allocation.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::record::Version;

/// Hands out strictly increasing versions, independently for each key.
///
/// All keys share one mutex. The critical section is a map lookup and an
/// increment, so contention stays negligible next to a network round trip.
#[derive(Default)]
pub struct VersionAllocator {
    counters: Mutex<HashMap<String, Version>>,
}

impl VersionAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next version for `key`. The first call for a key returns 1.
    pub fn next_version(&self, key: &str) -> Version {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(counter) = counters.get_mut(key) {
            *counter += 1;
            return *counter;
        }
        counters.insert(key.to_string(), 1);
        1
    }

    /// Last version handed out for `key`, or 0.
    pub fn current(&self, key: &str) -> Version {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn sequential_allocations_increase() {
        let allocator = VersionAllocator::new();
        let versions: Vec<_> = (0..5).map(|_| allocator.next_version("k")).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);
        assert_eq!(allocator.current("k"), 5);
    }

    #[test]
    fn keys_have_their_own_sequence() {
        let allocator = VersionAllocator::new();
        allocator.next_version("a");
        allocator.next_version("a");
        assert_eq!(allocator.next_version("b"), 1);
        assert_eq!(allocator.current("unknown"), 0);
    }

    #[test]
    fn concurrent_callers_never_share_a_version() {
        let allocator = Arc::new(VersionAllocator::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| allocator.next_version("shared"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = BTreeSet::new();
        for worker in workers {
            for version in worker.join().unwrap() {
                assert!(seen.insert(version), "version {version} handed out twice");
            }
        }
        assert_eq!(seen.len(), 800);
        assert_eq!(seen.iter().next_back(), Some(&800));
    }
}
