use std::collections::HashSet;

use anyhow::Result;
use tracing::{debug, info, trace};

use crate::stage::{SendResult, Stage};
use crate::state::StateStore;
use crate::types::{Batch, CustomerId};

/// Drop IDs that are already in the processed set, and duplicates, keeping
/// listing order.
pub fn plan_remaining(listed: Vec<CustomerId>, state_store: &StateStore) -> Vec<CustomerId> {
    let mut seen = HashSet::with_capacity(listed.len());
    listed
        .into_iter()
        .filter(|id| !state_store.contains(*id) && seen.insert(*id))
        .collect()
}

/// Groups remaining customer IDs into disjoint batches in listing order and
/// hands them to the deletion workers.
pub struct Batcher {
    stage: Stage<(), Batch>,
}

impl Batcher {
    pub fn new(stage: Stage<(), Batch>) -> Self {
        Self { stage }
    }

    /// Send every batch downstream. Returns the number of batches sent.
    /// Stops early, without error, when the pipeline is cancelled.
    pub async fn run(&self, remaining: Vec<CustomerId>) -> Result<u64> {
        let batch_size = self.stage.config.batch_size.max(1) as usize;
        debug!(
            remaining = remaining.len(),
            batch_size = batch_size,
            "batcher has started."
        );

        let mut sent: u64 = 0;
        for chunk in remaining.chunks(batch_size) {
            if self.stage.cancellation_token.is_cancelled() {
                info!(
                    batches_sent = sent,
                    "batcher has been cancelled, remaining batches will not be submitted."
                );
                return Ok(sent);
            }

            let batch = Batch::new(sent, chunk.to_vec());
            trace!(batch_index = batch.index, customer_ids = batch.id_list(), "batch built.");

            let send_result = tokio::select! {
                biased;
                _ = self.stage.cancellation_token.cancelled() => {
                    info!(batches_sent = sent, "batcher has been cancelled.");
                    return Ok(sent);
                }
                result = self.stage.send(batch) => result?,
            };
            if send_result == SendResult::Closed {
                return Ok(sent);
            }
            sent += 1;
        }

        debug!(batches_sent = sent, "batcher has been completed.");
        Ok(sent)
    }
}
