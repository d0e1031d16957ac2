//! Progress reporting derived from batch outcomes.
//!
//! The reporter only reads counts handed to it; it owns no pipeline state.

use std::sync::Mutex;

use tracing::info;

/// Point-in-time progress of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Customers processed so far, including those done by earlier runs.
    pub processed: u64,
    /// Customers known to the run: already processed plus remaining.
    pub total: u64,
    /// Customers in batches that ended in a fatal failure.
    pub failed: u64,
}

impl ProgressSnapshot {
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.processed + self.failed >= self.total
    }

    pub fn status_line(&self) -> String {
        format!(
            "Processed {}/{} customers ({:.1}%)",
            self.processed,
            self.total,
            self.percentage()
        )
    }
}

/// Receives progress after every batch outcome.
///
/// Implementations must return quickly; they run on the terminator task.
pub trait ProgressReporter: Send + Sync {
    /// Called once at start when a previous run left processed customers.
    fn report_already_processed(&self, count: u64);

    fn report_progress(&self, snapshot: ProgressSnapshot);
}

/// Writes one timestamped status line per batch through `tracing`.
#[derive(Debug, Default)]
pub struct LogProgressReporter;

impl ProgressReporter for LogProgressReporter {
    fn report_already_processed(&self, count: u64) {
        info!(already_processed = count, "Already processed: {count}");
    }

    fn report_progress(&self, snapshot: ProgressSnapshot) {
        info!(
            processed = snapshot.processed,
            total = snapshot.total,
            failed = snapshot.failed,
            "{}",
            snapshot.status_line()
        );
    }
}

/// Keeps every report in memory. Useful to library callers that render
/// progress themselves.
#[derive(Debug, Default)]
pub struct RecordingProgressReporter {
    already_processed: Mutex<Option<u64>>,
    snapshots: Mutex<Vec<ProgressSnapshot>>,
}

impl RecordingProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn already_processed(&self) -> Option<u64> {
        *self.already_processed.lock().unwrap()
    }

    pub fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<ProgressSnapshot> {
        self.snapshots.lock().unwrap().last().copied()
    }
}

impl ProgressReporter for RecordingProgressReporter {
    fn report_already_processed(&self, count: u64) {
        *self.already_processed.lock().unwrap() = Some(count);
    }

    fn report_progress(&self, snapshot: ProgressSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }
}
