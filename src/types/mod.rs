use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

pub mod error;
pub mod token;

/// Numeric identifier of a customer resource in the remote store.
///
/// Opaque: only equality, ordering and hashing are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CustomerId(pub u64);

impl CustomerId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for CustomerId {
    fn from(value: u64) -> Self {
        CustomerId(value)
    }
}

impl Display for CustomerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A group of customer IDs submitted together in a single delete call.
///
/// `index` is the zero-based construction order within the current run and
/// is only used for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub index: u64,
    pub ids: Vec<CustomerId>,
}

impl Batch {
    pub fn new(index: u64, ids: Vec<CustomerId>) -> Self {
        Self { index, ids }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Comma separated IDs, the format used by the `id:in` query parameter.
    pub fn id_list(&self) -> String {
        join_ids(&self.ids)
    }
}

pub fn join_ids(ids: &[CustomerId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Lifecycle of a batch inside a deletion worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Pending,
    Admitted,
    Submitted,
    Succeeded,
    FailedRetriable,
    FailedFatal,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchState::Succeeded | BatchState::FailedFatal)
    }
}

impl Display for BatchState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Pending => "PENDING",
            BatchState::Admitted => "ADMITTED",
            BatchState::Submitted => "SUBMITTED",
            BatchState::Succeeded => "SUCCEEDED",
            BatchState::FailedRetriable => "FAILED_RETRIABLE",
            BatchState::FailedFatal => "FAILED_FATAL",
        };
        f.write_str(name)
    }
}

/// One page of the remote customer listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerPage {
    pub ids: Vec<CustomerId>,
    /// `Some(true)` / `Some(false)` when the remote reports pagination
    /// metadata, `None` when it does not.
    pub has_more: Option<bool>,
    /// Total number of customers reported by the remote, if any.
    pub total: Option<u64>,
}

/// Statistics sent through the stats channel during pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionStatistics {
    CandidatesListed(u64),
    AlreadyProcessed(u64),
    BatchComplete { batch_index: u64, count: u64 },
    BatchRetry { batch_index: u64 },
    BatchFailed { batch_index: u64, count: u64 },
    Progress { processed: u64, total: u64 },
}

/// Where the remote store lives and how to authenticate against it.
#[derive(Debug, Clone)]
pub struct StoreTarget {
    pub store_hash: String,
    pub api_base_url: Option<String>,
    pub credential: StoreCredentials,
}

/// API credential with secure zeroization.
///
/// The token is cleared from memory on drop and never printed.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct StoreCredentials {
    pub access_token: String,
}

impl Debug for StoreCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreCredentials")
            .field("access_token", &"** redacted **")
            .finish()
    }
}

/// Snapshot of the counters kept by [`DeletionStatsReport`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeletionStats {
    pub listed_candidates: u64,
    pub already_processed: u64,
    pub processed_this_run: u64,
    pub succeeded_batches: u64,
    pub failed_batches: u64,
    pub failed_ids: u64,
    pub retries: u64,
}

/// Lock-free counters shared by all deletion workers.
#[derive(Debug, Default)]
pub struct DeletionStatsReport {
    listed_candidates: AtomicU64,
    already_processed: AtomicU64,
    processed_this_run: AtomicU64,
    succeeded_batches: AtomicU64,
    failed_batches: AtomicU64,
    failed_ids: AtomicU64,
    retries: AtomicU64,
}

impl DeletionStatsReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listed_candidates(&self, count: u64) {
        self.listed_candidates.store(count, Ordering::SeqCst);
    }

    pub fn set_already_processed(&self, count: u64) {
        self.already_processed.store(count, Ordering::SeqCst);
    }

    pub fn increment_succeeded(&self, id_count: u64) {
        self.succeeded_batches.fetch_add(1, Ordering::SeqCst);
        self.processed_this_run.fetch_add(id_count, Ordering::SeqCst);
    }

    pub fn increment_failed(&self, id_count: u64) {
        self.failed_batches.fetch_add(1, Ordering::SeqCst);
        self.failed_ids.fetch_add(id_count, Ordering::SeqCst);
    }

    pub fn increment_retries(&self) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> DeletionStats {
        DeletionStats {
            listed_candidates: self.listed_candidates.load(Ordering::SeqCst),
            already_processed: self.already_processed.load(Ordering::SeqCst),
            processed_this_run: self.processed_this_run.load(Ordering::SeqCst),
            succeeded_batches: self.succeeded_batches.load(Ordering::SeqCst),
            failed_batches: self.failed_batches.load(Ordering::SeqCst),
            failed_ids: self.failed_ids.load(Ordering::SeqCst),
            retries: self.retries.load(Ordering::SeqCst),
        }
    }
}
