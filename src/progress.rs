//! Progress-callback trait for batch runs.
//!
//! Pass an [`Arc<dyn BatchProgressCallback>`] through
//! [`crate::config::ProcessOptions::callback`] to receive a fresh
//! [`BatchProgress`] snapshot whenever the orchestrator changes phase,
//! finishes an item, or ends the run. Callers can forward these to a
//! terminal progress bar, a channel or a UI store; the library does not care.
//!
//! # Example
//!
//! ```rust
//! use edgequake_capture2pdf::{BatchProgress, BatchProgressCallback, ProcessOptions};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Counter(AtomicUsize);
//!
//! impl BatchProgressCallback for Counter {
//!     fn on_item_finished(&self, progress: &BatchProgress, _item_id: &str, _error: Option<&str>) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}/{} done", progress.completed, progress.total);
//!     }
//! }
//!
//! let opts = ProcessOptions::default()
//!     .callback(Arc::new(Counter(AtomicUsize::new(0))));
//! ```

use crate::model::BatchProgress;
use std::sync::Arc;

/// Called by the orchestrator as a batch advances.
///
/// All methods have default no-op implementations. Calls are made from the
/// task running [`crate::orchestrator::Pipeline::process`], one at a time,
/// but implementations must still be `Send + Sync` since that task may move
/// between worker threads.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once, before the first item, with the number of pending items.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when the phase or the current item changes.
    fn on_phase_change(&self, progress: &BatchProgress) {
        let _ = progress;
    }

    /// Called after every item, successful or not.
    ///
    /// # Arguments
    /// * `progress` — snapshot with counts and percentage already updated
    /// * `item_id`  — queue id of the item that just finished
    /// * `error`    — final error message when the item failed
    fn on_item_finished(&self, progress: &BatchProgress, item_id: &str, error: Option<&str>) {
        let _ = (progress, item_id, error);
    }

    /// Called exactly once per run, last, with the final snapshot.
    fn on_batch_complete(&self, progress: &BatchProgress) {
        let _ = progress;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessOptions`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
