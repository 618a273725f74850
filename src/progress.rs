//! Progress-callback trait for analysis-run events.
//!
//! Inject an [`Arc<dyn RunProgressCallback>`] via
//! [`crate::config::DescriberConfigBuilder::progress_callback`] to receive
//! events as the orchestrator extracts files and dispatches each invoice
//! group.
//!
//! # Example
//!
//! ```rust
//! use invoice_describer::{DescriberConfig, RunProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicU8, Ordering}};
//!
//! struct PercentTracker {
//!     last: AtomicU8,
//! }
//!
//! impl RunProgressCallback for PercentTracker {
//!     fn on_group_complete(&self, _position: usize, _total: usize, percent: u8, _sentinel: bool) {
//!         self.last.store(percent, Ordering::SeqCst);
//!     }
//! }
//!
//! let tracker = Arc::new(PercentTracker { last: AtomicU8::new(0) });
//!
//! let config = DescriberConfig::builder()
//!     .progress_callback(tracker as Arc<dyn RunProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::RunState;
use std::sync::Arc;

/// Called by the orchestrator as a run advances.
///
/// Groups are dispatched one at a time, so group events never overlap.
/// File events may arrive from concurrent extraction and must not assume
/// ordering between files. All methods default to no-ops.
pub trait RunProgressCallback: Send + Sync {
    /// Called on every state transition.
    fn on_state_change(&self, state: RunState) {
        let _ = state;
    }

    /// Called when a file was rejected or failed to extract.
    ///
    /// # Arguments
    /// * `file`  — file name as supplied
    /// * `error` — human-readable cause
    fn on_file_error(&self, file: &str, error: &str) {
        let _ = (file, error);
    }

    /// Called once before the first group is dispatched.
    ///
    /// # Arguments
    /// * `total_groups` — number of selected groups that will be dispatched
    fn on_run_start(&self, total_groups: usize) {
        let _ = total_groups;
    }

    /// Called just before a group's request is sent.
    ///
    /// # Arguments
    /// * `position` — 1-indexed position in the dispatch queue
    /// * `total`    — queue length
    /// * `group_id` — id of the group being described
    fn on_group_start(&self, position: usize, total: usize, group_id: &str) {
        let _ = (position, total, group_id);
    }

    /// Called after a group's result was recorded.
    ///
    /// # Arguments
    /// * `position` — 1-indexed position in the dispatch queue
    /// * `total`    — queue length
    /// * `percent`  — `round(100 * completed / total)`
    /// * `sentinel` — the endpoint returned no usable content
    fn on_group_complete(&self, position: usize, total: usize, percent: u8, sentinel: bool) {
        let _ = (position, total, percent, sentinel);
    }

    /// Called once when a transport failure stops the run.
    fn on_run_failed(&self, completed: usize, total: usize, error: &str) {
        let _ = (completed, total, error);
    }

    /// Called once after every group has been dispatched.
    ///
    /// # Arguments
    /// * `total`     — results recorded
    /// * `sentinels` — how many of them are "no result" placeholders
    fn on_run_complete(&self, total: usize, sentinels: usize) {
        let _ = (total, sentinels);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl RunProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DescriberConfig`].
pub type ProgressCallback = Arc<dyn RunProgressCallback>;

/// `round(100 * completed / total)`, clamped to 0..=100. An empty queue is 100%.
pub fn percent_complete(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (100.0 * completed as f64 / total as f64).round();
    pct.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct TrackingCallback {
        starts: AtomicUsize,
        percents: Mutex<Vec<u8>>,
        states: Mutex<Vec<RunState>>,
    }

    impl RunProgressCallback for TrackingCallback {
        fn on_state_change(&self, state: RunState) {
            self.states.lock().unwrap().push(state);
        }

        fn on_group_start(&self, _position: usize, _total: usize, _group_id: &str) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_group_complete(&self, _position: usize, _total: usize, percent: u8, _sentinel: bool) {
            self.percents.lock().unwrap().push(percent);
        }
    }

    #[test]
    fn percent_rounds_half_up() {
        assert_eq!(percent_complete(1, 3), 33);
        assert_eq!(percent_complete(2, 3), 67);
        assert_eq!(percent_complete(1, 8), 13);
        assert_eq!(percent_complete(3, 3), 100);
        assert_eq!(percent_complete(0, 0), 100);
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_state_change(RunState::Dispatching);
        cb.on_file_error("a.pdf", "not a pdf");
        cb.on_run_start(2);
        cb.on_group_start(1, 2, "a.pdf#1");
        cb.on_group_complete(1, 2, 50, false);
        cb.on_run_failed(1, 2, "HTTP 500");
        cb.on_run_complete(2, 0);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            starts: AtomicUsize::new(0),
            percents: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
        };
        let cb: &dyn RunProgressCallback = &tracker;

        cb.on_state_change(RunState::Segmenting);
        cb.on_group_start(1, 2, "x#1");
        cb.on_group_complete(1, 2, percent_complete(1, 2), false);
        cb.on_group_start(2, 2, "x#2");
        cb.on_group_complete(2, 2, percent_complete(2, 2), true);

        assert_eq!(tracker.starts.load(Ordering::SeqCst), 2);
        assert_eq!(*tracker.percents.lock().unwrap(), vec![50, 100]);
        assert_eq!(*tracker.states.lock().unwrap(), vec![RunState::Segmenting]);
    }
}
