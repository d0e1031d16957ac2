//! Batch deletion against the remote customers API.
//!
//! One delete call per batch. The remote accepts at most ten IDs per call.

use async_trait::async_trait;
use tracing::debug;

use crate::config::args::MAX_BATCH_SIZE;
use crate::storage::Storage;
use crate::types::Batch;
use crate::types::error::ApiError;

use super::Deleter;

/// Deletes a whole batch with a single remote call.
pub struct RemoteDeleter {
    target: Storage,
}

impl RemoteDeleter {
    pub fn new(target: Storage) -> Self {
        Self { target }
    }
}

#[async_trait]
impl Deleter for RemoteDeleter {
    async fn delete(&self, batch: &Batch) -> Result<(), ApiError> {
        debug_assert!(batch.len() <= MAX_BATCH_SIZE as usize);

        if batch.is_empty() {
            return Ok(());
        }

        debug!(
            batch_index = batch.index,
            batch_size = batch.len(),
            "sending delete customers request."
        );
        self.target.delete_customers(&batch.ids).await
    }
}
