//! Dry-run backend: every batch succeeds without touching the remote.

use async_trait::async_trait;
use tracing::info;

use crate::types::Batch;
use crate::types::error::ApiError;

use super::Deleter;

#[derive(Debug, Default)]
pub struct DryRunDeleter;

impl DryRunDeleter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Deleter for DryRunDeleter {
    async fn delete(&self, batch: &Batch) -> Result<(), ApiError> {
        info!(
            batch_index = batch.index,
            customer_ids = batch.id_list(),
            "[dry-run] delete completed."
        );
        Ok(())
    }
}
