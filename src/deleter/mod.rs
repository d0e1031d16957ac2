//! Deletion components for the bcrm pipeline.
//!
//! This module contains the CustomerDeleter worker, which drives each batch
//! through its lifecycle, and the Deleter trait with its two
//! implementations: RemoteDeleter and DryRunDeleter.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

use crate::stage::{SendResult, Stage};
use crate::state::StateStore;
use crate::types::error::{ApiError, BcrmError};
use crate::types::{Batch, BatchState, CustomerId, DeletionStatistics, DeletionStatsReport};

pub mod dry_run;
pub mod remote;

pub use dry_run::DryRunDeleter;
pub use remote::RemoteDeleter;


// ---------------------------------------------------------------------------
// Deleter trait
// ---------------------------------------------------------------------------

/// Trait for deletion backends (remote or dry-run).
///
/// One call submits one batch and returns the classified remote outcome.
#[async_trait]
pub trait Deleter: Send + Sync {
    async fn delete(&self, batch: &Batch) -> Result<(), ApiError>;
}

/// Terminal outcome of one batch, forwarded to the terminator.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub batch_index: u64,
    pub ids: Vec<CustomerId>,
    /// Either `Succeeded` or `FailedFatal`.
    pub state: BatchState,
    pub attempts: u32,
    pub error: Option<ApiError>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.state == BatchState::Succeeded
    }
}

// ---------------------------------------------------------------------------
// CustomerDeleter worker
// ---------------------------------------------------------------------------

/// Pipeline worker that reads batches from the shared input channel and
/// drives each one to a terminal state.
///
/// `max_concurrent` workers share one MPMC channel, so the number of
/// workers is the number of batches in flight.
pub struct CustomerDeleter {
    worker_index: u16,
    base: Stage<Batch, BatchOutcome>,
    state_store: Arc<StateStore>,
    deletion_stats_report: Arc<DeletionStatsReport>,
    deleter: Box<dyn Deleter>,
}

impl CustomerDeleter {
    pub fn new(
        base: Stage<Batch, BatchOutcome>,
        worker_index: u16,
        state_store: Arc<StateStore>,
        deletion_stats_report: Arc<DeletionStatsReport>,
    ) -> Self {
        let deleter: Box<dyn Deleter> = if base.config.dry_run {
            Box::new(DryRunDeleter::new())
        } else {
            Box::new(RemoteDeleter::new(base.target.clone()))
        };

        Self::with_deleter(
            base,
            worker_index,
            state_store,
            deletion_stats_report,
            deleter,
        )
    }

    pub fn with_deleter(
        base: Stage<Batch, BatchOutcome>,
        worker_index: u16,
        state_store: Arc<StateStore>,
        deletion_stats_report: Arc<DeletionStatsReport>,
        deleter: Box<dyn Deleter>,
    ) -> Self {
        Self {
            worker_index,
            base,
            state_store,
            deletion_stats_report,
            deleter,
        }
    }

    /// Main entry point: read batches from the channel and delete them.
    pub async fn delete(&mut self) -> Result<()> {
        debug!(worker_index = self.worker_index, "delete worker started.");

        let receiver = self
            .base
            .receiver
            .clone()
            .ok_or_else(|| anyhow!("delete worker has no input channel."))?;

        loop {
            let batch = tokio::select! {
                biased;
                _ = self.base.cancellation_token.cancelled() => {
                    info!(worker_index = self.worker_index, "delete worker has been cancelled.");
                    return Ok(());
                }
                recv_result = receiver.recv() => match recv_result {
                    Ok(batch) => batch,
                    Err(_) => {
                        debug!(worker_index = self.worker_index, "delete worker has been completed.");
                        return Ok(());
                    }
                },
            };

            let Some(outcome) = self.process_batch(batch).await? else {
                return Ok(());
            };

            let auth_failure = match &outcome.error {
                Some(e @ ApiError::Authentication { .. }) => Some(format!(
                    "batch {} was refused: {e}",
                    outcome.batch_index
                )),
                _ => None,
            };

            if self.base.send(outcome).await? == SendResult::Closed {
                return Ok(());
            }

            // Every later batch would be refused the same way.
            if let Some(message) = auth_failure {
                self.base.cancellation_token.cancel();
                return Err(anyhow!(BcrmError::Api(message)));
            }
        }
    }

    /// Run one batch through `PENDING → ADMITTED → SUBMITTED → terminal`.
    ///
    /// Returns `None` when cancellation arrived while the batch was still
    /// waiting for backoff or admission. Such a batch is left untouched and
    /// will be picked up by the next run.
    async fn process_batch(&self, batch: Batch) -> Result<Option<BatchOutcome>> {
        let retry_config = self.base.config.retry_config;
        let mut state = BatchState::Pending;
        let mut attempt: u32 = 0;
        let mut rate_limited = false;

        loop {
            attempt += 1;

            if attempt > 1 && !rate_limited {
                let delay = retry_config.backoff_before_attempt(attempt);
                if !self.base.backoff(delay).await {
                    self.log_abandoned(&batch, attempt);
                    return Ok(None);
                }
            }
            if !self.base.admit().await {
                self.log_abandoned(&batch, attempt);
                return Ok(None);
            }
            state = self.transition(&batch, state, BatchState::Admitted);

            state = self.transition(&batch, state, BatchState::Submitted);
            let result = self.deleter.delete(&batch).await;

            match result {
                Ok(()) => {
                    if let Err(e) = self.state_store.mark_done(&batch.ids).await {
                        self.base.cancellation_token.cancel();
                        error!(
                            worker_index = self.worker_index,
                            batch_index = batch.index,
                            customer_ids = batch.id_list(),
                            error = format!("{e:#}"),
                            "failed to record deleted customers, stopping."
                        );
                        return Err(e);
                    }
                    self.transition(&batch, state, BatchState::Succeeded);

                    self.deletion_stats_report
                        .increment_succeeded(batch.len() as u64);
                    self.base
                        .send_stats(DeletionStatistics::BatchComplete {
                            batch_index: batch.index,
                            count: batch.len() as u64,
                        })
                        .await;
                    info!(
                        worker_index = self.worker_index,
                        batch_index = batch.index,
                        count = batch.len(),
                        attempt = attempt,
                        customer_ids = batch.id_list(),
                        "batch deleted."
                    );

                    return Ok(Some(BatchOutcome {
                        batch_index: batch.index,
                        ids: batch.ids,
                        state: BatchState::Succeeded,
                        attempts: attempt,
                        error: None,
                    }));
                }
                Err(e) if e.is_retryable() && attempt < retry_config.max_attempts => {
                    state = self.transition(&batch, state, BatchState::FailedRetriable);
                    warn!(
                        worker_index = self.worker_index,
                        batch_index = batch.index,
                        attempt = attempt,
                        max_attempts = retry_config.max_attempts,
                        error = e.to_string(),
                        "batch delete failed, retrying."
                    );

                    self.deletion_stats_report.increment_retries();
                    self.base
                        .send_stats(DeletionStatistics::BatchRetry {
                            batch_index: batch.index,
                        })
                        .await;

                    rate_limited = match e.retry_after() {
                        Some(retry_after) => {
                            self.base.governor.suspend(retry_after);
                            true
                        }
                        None => false,
                    };
                    state = self.transition(&batch, state, BatchState::Pending);
                }
                Err(e) => {
                    self.transition(&batch, state, BatchState::FailedFatal);
                    error!(
                        worker_index = self.worker_index,
                        batch_index = batch.index,
                        attempt = attempt,
                        customer_ids = batch.id_list(),
                        error = e.to_string(),
                        "batch delete failed permanently."
                    );

                    self.deletion_stats_report
                        .increment_failed(batch.len() as u64);
                    self.base
                        .send_stats(DeletionStatistics::BatchFailed {
                            batch_index: batch.index,
                            count: batch.len() as u64,
                        })
                        .await;
                    self.base.set_warning();

                    return Ok(Some(BatchOutcome {
                        batch_index: batch.index,
                        ids: batch.ids,
                        state: BatchState::FailedFatal,
                        attempts: attempt,
                        error: Some(e),
                    }));
                }
            }
        }
    }

    fn transition(&self, batch: &Batch, from: BatchState, to: BatchState) -> BatchState {
        trace!(
            worker_index = self.worker_index,
            batch_index = batch.index,
            from = %from,
            to = %to,
        );
        to
    }

    fn log_abandoned(&self, batch: &Batch, attempt: u32) {
        info!(
            worker_index = self.worker_index,
            batch_index = batch.index,
            attempt = attempt,
            customer_ids = batch.id_list(),
            "batch not submitted due to cancellation."
        );
    }
}
