//! Shared test utilities for the bcrm library crate.
//!
//! This module provides canonical helper functions used across multiple test
//! modules, eliminating duplication and ensuring consistency.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_channel::Sender;
use async_trait::async_trait;

use crate::config::Config;
use crate::storage::StorageTrait;
use crate::types::error::ApiError;
use crate::types::token::PipelineCancellationToken;
use crate::types::{CustomerId, CustomerPage, DeletionStatistics};

/// Initialise a dummy tracing subscriber for tests.
///
/// Uses `try_init` so that only the first call in a process actually
/// installs the subscriber; subsequent calls are silently ignored.
pub(crate) fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}

/// Create a default [`Config`] suitable for most unit / property tests.
///
/// Key defaults: `batch_size=10`, `max_concurrent=5`, `page_size=250`,
/// fast retries, and the state directory pointing at `state_dir`.
pub(crate) fn make_test_config(state_dir: &std::path::Path) -> Config {
    let mut config = Config::for_store("teststore", "test-token");
    config.state_dir = state_dir.to_path_buf();
    config.show_no_progress = true;
    config.retry_config.initial_backoff_milliseconds = 10;
    config.retry_config.max_backoff_milliseconds = 100;
    config
}

pub(crate) fn customer_ids(range: std::ops::Range<u64>) -> Vec<CustomerId> {
    range.map(CustomerId).collect()
}

/// In-memory remote customer store.
///
/// Records every call. Failures can be scripted for the next N calls, or
/// attached permanently to an ID so any batch containing it is rejected.
#[derive(Clone)]
pub(crate) struct MockStorage {
    customers: Arc<Mutex<BTreeSet<CustomerId>>>,
    list_calls: Arc<Mutex<Vec<u32>>>,
    delete_calls: Arc<Mutex<Vec<Vec<CustomerId>>>>,
    deleted: Arc<Mutex<Vec<CustomerId>>>,
    list_failures: Arc<Mutex<VecDeque<ApiError>>>,
    delete_failures: Arc<Mutex<VecDeque<ApiError>>>,
    poisoned_ids: Arc<Mutex<HashMap<CustomerId, ApiError>>>,
    successful_deletes: Arc<AtomicUsize>,
    cancel_after_deletes: Arc<Mutex<Option<(usize, PipelineCancellationToken)>>>,
    report_pagination: bool,
    stats_sender: Sender<DeletionStatistics>,
    has_warning: Arc<AtomicBool>,
}

impl MockStorage {
    pub(crate) fn new(ids: Vec<CustomerId>, stats_sender: Sender<DeletionStatistics>) -> Self {
        Self {
            customers: Arc::new(Mutex::new(ids.into_iter().collect())),
            list_calls: Arc::new(Mutex::new(Vec::new())),
            delete_calls: Arc::new(Mutex::new(Vec::new())),
            deleted: Arc::new(Mutex::new(Vec::new())),
            list_failures: Arc::new(Mutex::new(VecDeque::new())),
            delete_failures: Arc::new(Mutex::new(VecDeque::new())),
            poisoned_ids: Arc::new(Mutex::new(HashMap::new())),
            successful_deletes: Arc::new(AtomicUsize::new(0)),
            cancel_after_deletes: Arc::new(Mutex::new(None)),
            report_pagination: true,
            stats_sender,
            has_warning: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn without_pagination(mut self) -> Self {
        self.report_pagination = false;
        self
    }

    pub(crate) fn fail_next_list(&self, error: ApiError) {
        self.list_failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn fail_next_delete(&self, error: ApiError) {
        self.delete_failures.lock().unwrap().push_back(error);
    }

    pub(crate) fn poison(&self, id: CustomerId, error: ApiError) {
        self.poisoned_ids.lock().unwrap().insert(id, error);
    }

    /// Cancel `token` once `count` delete calls have succeeded, simulating
    /// an operator interrupt part-way through a run.
    pub(crate) fn cancel_after_deletes(&self, count: usize, token: PipelineCancellationToken) {
        *self.cancel_after_deletes.lock().unwrap() = Some((count, token));
    }

    /// Same remote contents, reporting through another stats channel.
    pub(crate) fn reattach(&self, stats_sender: Sender<DeletionStatistics>) -> Self {
        Self {
            stats_sender,
            ..self.clone()
        }
    }

    pub(crate) fn remaining(&self) -> Vec<CustomerId> {
        self.customers.lock().unwrap().iter().copied().collect()
    }

    pub(crate) fn list_calls(&self) -> Vec<u32> {
        self.list_calls.lock().unwrap().clone()
    }

    pub(crate) fn delete_calls(&self) -> Vec<Vec<CustomerId>> {
        self.delete_calls.lock().unwrap().clone()
    }

    /// IDs removed by successful delete calls, in call order.
    pub(crate) fn deleted_ids(&self) -> Vec<CustomerId> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageTrait for MockStorage {
    async fn list_customers(&self, page: u32, limit: u16) -> Result<CustomerPage, ApiError> {
        self.list_calls.lock().unwrap().push(page);
        if let Some(error) = self.list_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let customers = self.customers.lock().unwrap();
        let total = customers.len() as u64;
        let limit = limit as u64;
        let skip = (page as u64 - 1) * limit;
        let ids: Vec<CustomerId> = customers
            .iter()
            .skip(skip as usize)
            .take(limit as usize)
            .copied()
            .collect();

        let total_pages = total.div_ceil(limit);
        Ok(CustomerPage {
            ids,
            has_more: self
                .report_pagination
                .then_some((page as u64) < total_pages),
            total: self.report_pagination.then_some(total),
        })
    }

    async fn delete_customers(&self, ids: &[CustomerId]) -> Result<(), ApiError> {
        self.delete_calls.lock().unwrap().push(ids.to_vec());
        if let Some(error) = self.delete_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        {
            let poisoned = self.poisoned_ids.lock().unwrap();
            if let Some(error) = ids.iter().find_map(|id| poisoned.get(id)) {
                return Err(error.clone());
            }
        }

        let mut customers = self.customers.lock().unwrap();
        for id in ids {
            customers.remove(id);
        }
        self.deleted.lock().unwrap().extend_from_slice(ids);
        let succeeded = self.successful_deletes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((count, token)) = self.cancel_after_deletes.lock().unwrap().as_ref() {
            if succeeded >= *count {
                token.cancel();
            }
        }
        Ok(())
    }

    fn get_stats_sender(&self) -> Sender<DeletionStatistics> {
        self.stats_sender.clone()
    }

    async fn send_stats(&self, stats: DeletionStatistics) {
        let _ = self.stats_sender.send(stats).await;
    }

    fn set_warning(&self) {
        self.has_warning.store(true, Ordering::SeqCst);
    }
}
