use anyhow::Result;
use async_channel::Sender;
use async_trait::async_trait;
use dyn_clone::DynClone;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::config::Config;
use crate::types::error::ApiError;
use crate::types::{CustomerId, CustomerPage, DeletionStatistics};

pub mod bigcommerce;

/// Type alias for a boxed Storage trait object.
pub type Storage = Box<dyn StorageTrait + Send + Sync>;

/// Factory trait for creating Storage instances.
#[async_trait]
pub trait StorageFactory {
    async fn create(
        config: Config,
        stats_sender: Sender<DeletionStatistics>,
        has_warning: Arc<AtomicBool>,
    ) -> Result<Storage>;
}

/// Remote customer API used by the deletion pipeline.
///
/// Implementations perform exactly one remote call per method invocation.
/// Pacing and retries belong to the caller; every failure comes back
/// classified as an [`ApiError`] so the caller can decide.
#[async_trait]
pub trait StorageTrait: DynClone {
    /// Fetch one listing page. `page` starts at 1, `limit` is at most 250.
    async fn list_customers(&self, page: u32, limit: u16) -> Result<CustomerPage, ApiError>;

    /// Delete up to 10 customers in a single request.
    ///
    /// IDs that are already absent on the remote count as deleted.
    async fn delete_customers(&self, ids: &[CustomerId]) -> Result<(), ApiError>;

    /// Get the statistics sender channel.
    fn get_stats_sender(&self) -> Sender<DeletionStatistics>;

    /// Send a statistics event through the channel.
    async fn send_stats(&self, stats: DeletionStatistics);

    /// Set the warning flag to indicate a warning occurred.
    fn set_warning(&self);
}

dyn_clone::clone_trait_object!(StorageTrait);

/// Create the remote storage for the configured store.
pub async fn create_storage(
    config: Config,
    stats_sender: Sender<DeletionStatistics>,
    has_warning: Arc<AtomicBool>,
) -> Result<Storage> {
    bigcommerce::BigCommerceStorageFactory::create(config, stats_sender, has_warning).await
}
