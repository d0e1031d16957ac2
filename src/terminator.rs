//! Terminator stage for the deletion pipeline.
//!
//! Consumes every batch outcome produced by the deletion workers, keeps the
//! running totals, and hands a progress snapshot to the reporter after each
//! outcome. The workers' output channel is unbounded so reporting never
//! holds a worker back.

use std::sync::Arc;

use async_channel::{Receiver, Sender};
use tracing::debug;

use crate::deleter::BatchOutcome;
use crate::progress::{ProgressReporter, ProgressSnapshot};
use crate::types::{CustomerId, DeletionStatistics};

/// What the terminator saw once the workers' channel closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminatorReport {
    pub snapshot: ProgressSnapshot,
    pub outcomes: u64,
    pub failed_ids: Vec<CustomerId>,
}

pub struct Terminator {
    receiver: Receiver<BatchOutcome>,
    reporter: Arc<dyn ProgressReporter>,
    stats_sender: Sender<DeletionStatistics>,
    already_processed: u64,
    total: u64,
}

impl Terminator {
    pub fn new(
        receiver: Receiver<BatchOutcome>,
        reporter: Arc<dyn ProgressReporter>,
        stats_sender: Sender<DeletionStatistics>,
        already_processed: u64,
        total: u64,
    ) -> Self {
        Self {
            receiver,
            reporter,
            stats_sender,
            already_processed,
            total,
        }
    }

    /// Consume all outcomes until the channel closes.
    pub async fn terminate(&self) -> TerminatorReport {
        debug!("terminator has started.");

        let mut report = TerminatorReport {
            snapshot: ProgressSnapshot {
                processed: self.already_processed,
                total: self.total,
                failed: 0,
            },
            ..TerminatorReport::default()
        };

        while let Ok(outcome) = self.receiver.recv().await {
            report.outcomes += 1;
            if outcome.is_success() {
                report.snapshot.processed += outcome.ids.len() as u64;
            } else {
                report.snapshot.failed += outcome.ids.len() as u64;
                report.failed_ids.extend_from_slice(&outcome.ids);
            }

            self.reporter.report_progress(report.snapshot);
            let _ = self
                .stats_sender
                .send(DeletionStatistics::Progress {
                    processed: report.snapshot.processed,
                    total: report.snapshot.total,
                })
                .await;
        }

        report.failed_ids.sort_unstable();
        debug!(outcomes = report.outcomes, "terminator has been completed.");
        report
    }
}
