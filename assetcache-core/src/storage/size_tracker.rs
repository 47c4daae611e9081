use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct SizeState {
    total_bytes: u64,
    evicting: bool,
}

/// Owns the running total of permanent entry bytes and the
/// eviction-in-flight flag. Both live behind one lock.
#[derive(Debug, Default)]
pub struct SizeTracker {
    state: Mutex<SizeState>,
}

impl SizeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SizeState> {
        // The state is two integers; a panicked holder cannot leave it torn.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn total(&self) -> u64 {
        self.lock().total_bytes
    }

    pub fn add(&self, bytes: u64) -> u64 {
        let mut state = self.lock();
        state.total_bytes = state.total_bytes.saturating_add(bytes);
        state.total_bytes
    }

    pub fn sub(&self, bytes: u64) -> u64 {
        let mut state = self.lock();
        state.total_bytes = state.total_bytes.saturating_sub(bytes);
        state.total_bytes
    }

    /// Swaps a replaced entry's length for its successor's in one step.
    pub fn replace(&self, old_bytes: u64, new_bytes: u64) -> u64 {
        let mut state = self.lock();
        state.total_bytes = state
            .total_bytes
            .saturating_sub(old_bytes)
            .saturating_add(new_bytes);
        state.total_bytes
    }

    pub fn is_evicting(&self) -> bool {
        self.lock().evicting
    }

    /// Claims the eviction slot when the total exceeds `cap` and nobody else
    /// holds it. Returns whether the caller now owns the run.
    pub fn try_begin_eviction(&self, cap: u64) -> bool {
        let mut state = self.lock();
        if state.total_bytes <= cap || state.evicting {
            return false;
        }
        state.evicting = true;
        true
    }

    pub fn finish_eviction(&self) {
        self.lock().evicting = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_sub_replace() {
        let tracker = SizeTracker::new();
        assert_eq!(tracker.add(100), 100);
        assert_eq!(tracker.add(50), 150);
        assert_eq!(tracker.replace(50, 20), 120);
        assert_eq!(tracker.sub(500), 0);
    }

    #[test]
    fn test_single_flight_eviction() {
        let tracker = SizeTracker::new();
        tracker.add(10);
        assert!(!tracker.try_begin_eviction(10));

        tracker.add(1);
        assert!(tracker.try_begin_eviction(10));
        assert!(tracker.is_evicting());
        assert!(!tracker.try_begin_eviction(10));

        tracker.finish_eviction();
        assert!(!tracker.is_evicting());
        assert!(tracker.try_begin_eviction(10));
    }
}
