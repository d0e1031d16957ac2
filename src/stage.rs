use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_channel::{Receiver, Sender};

use crate::config::Config;
use crate::governor::RateGovernor;
use crate::storage::Storage;
use crate::types::DeletionStatistics;
use crate::types::token::PipelineCancellationToken;

/// Result of sending an item to the next stage.
#[derive(Debug, Clone, PartialEq)]
pub enum SendResult {
    Success,
    Closed,
}

/// Shared context passed to each pipeline stage.
///
/// Channels connect stages: each stage reads from `receiver` and writes to
/// `sender`. The lister has no `receiver` and the deletion workers' output
/// feeds the terminator. Every stage that talks to the remote goes through
/// the same [`RateGovernor`].
pub struct Stage<In, Out> {
    pub config: Config,
    pub target: Storage,
    pub governor: Arc<RateGovernor>,
    pub receiver: Option<Receiver<In>>,
    pub sender: Option<Sender<Out>>,
    pub cancellation_token: PipelineCancellationToken,
    pub has_warning: Arc<AtomicBool>,
}

impl<In, Out> Stage<In, Out> {
    pub fn new(
        config: Config,
        target: Storage,
        governor: Arc<RateGovernor>,
        receiver: Option<Receiver<In>>,
        sender: Option<Sender<Out>>,
        cancellation_token: PipelineCancellationToken,
        has_warning: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            target,
            governor,
            receiver,
            sender,
            cancellation_token,
            has_warning,
        }
    }

    /// Send an item to the next stage via the sender channel.
    ///
    /// Returns `SendResult::Closed` if the downstream channel has been closed
    /// (e.g. due to cancellation), allowing the caller to exit gracefully.
    pub async fn send(&self, item: Out) -> Result<SendResult> {
        let sender = self
            .sender
            .as_ref()
            .context("stage has no downstream channel.")?;

        if let Err(e) = sender.send(item).await {
            return if !sender.is_closed() {
                Err(anyhow!(e.to_string()))
            } else {
                Ok(SendResult::Closed)
            };
        }

        Ok(SendResult::Success)
    }

    /// Wait for a rate governor admission. Returns `false` when the
    /// pipeline was cancelled first.
    pub async fn admit(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => false,
            _ = self.governor.admit() => true,
        }
    }

    /// Sleep for `duration`. Returns `false` when the pipeline was
    /// cancelled first.
    pub async fn backoff(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.cancellation_token.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Send a statistics event through the storage stats channel.
    pub async fn send_stats(&self, stats: DeletionStatistics) {
        let _ = self.target.get_stats_sender().send(stats).await;
    }

    /// Set the warning flag to indicate a non-fatal issue occurred.
    pub fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }
}
