use std::collections::HashSet;
use std::sync::Mutex;

use uuid::Uuid;

use crate::function::FunctionError;

/// Remembers which failures have already been written to the ledger.
///
/// One tracker is shared by every nested execution frame of a top-level
/// call. When a failure propagates outward through several frames, only
/// the first (innermost) frame to see it records a crash.
#[derive(Debug, Default)]
pub struct CrashTracker {
    processed: Mutex<HashSet<Uuid>>,
}

impl CrashTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `error` as processed. Returns `true` the first time a given
    /// error instance is seen, `false` on every later sighting.
    pub fn first_sighting(&self, error: &FunctionError) -> bool {
        self.processed
            .lock()
            .expect("lock poisoned")
            .insert(error.instance())
    }

    pub fn is_processed(&self, error: &FunctionError) -> bool {
        self.processed
            .lock()
            .expect("lock poisoned")
            .contains(&error.instance())
    }

    /// Number of distinct failures processed so far.
    pub fn len(&self) -> usize {
        self.processed.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_error_is_processed_once_across_frames() {
        let tracker = CrashTracker::new();
        let err = FunctionError::new("ValueError", "deep failure");
        let sightings = (0..6)
            .map(|_| tracker.first_sighting(&err.clone()))
            .filter(|first| *first)
            .count();
        assert_eq!(sightings, 1);
        assert!(tracker.is_processed(&err));
    }

    #[test]
    fn distinct_errors_are_tracked_separately() {
        let tracker = CrashTracker::new();
        assert!(tracker.first_sighting(&FunctionError::new("A", "a")));
        assert!(tracker.first_sighting(&FunctionError::new("A", "a")));
        assert_eq!(tracker.len(), 2);
    }
}
