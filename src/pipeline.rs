//! Deletion pipeline orchestrator.
//!
//! Creates and connects all pipeline stages:
//! List → Batch → Delete (MPMC workers) → Terminate.
//!
//! Enumeration completes before the first batch is built. The remote listing
//! is not stable while customers are being deleted, and a listing failure
//! must abort the run before anything is removed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::batcher::{Batcher, plan_remaining};
use crate::config::Config;
use crate::deleter::{BatchOutcome, CustomerDeleter};
use crate::governor::RateGovernor;
use crate::lister::{CustomerLister, ListingSummary};
use crate::progress::{LogProgressReporter, ProgressReporter};
use crate::stage::Stage;
use crate::state::StateStore;
use crate::storage::{self, Storage};
use crate::terminator::{Terminator, TerminatorReport};
use crate::types::error::{BcrmError, is_cancelled_error};
use crate::types::token::PipelineCancellationToken;
use crate::types::{
    Batch, CustomerId, DeletionStatistics, DeletionStats, DeletionStatsReport, join_ids,
};

/// Final account of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub listed: u64,
    pub already_processed: u64,
    pub total: u64,
    pub processed: u64,
    pub failed_ids: Vec<CustomerId>,
    pub batches_planned: u64,
    pub batches_completed: u64,
    pub interrupted: bool,
    pub duration: Duration,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.batches_completed == self.batches_planned
    }
}

/// The core deletion pipeline orchestrator.
///
/// ## Pipeline stages
///
/// ```text
/// CustomerLister → Batcher → CustomerDeleter Workers (MPMC) → Terminator
/// ```
///
/// ## Usage
///
/// ```no_run
/// # async fn example() {
/// # use bcrm_rs::{Config, DeletionPipeline, create_pipeline_cancellation_token};
/// let config = Config::for_store("abc123", "my-token");
/// let cancellation_token = create_pipeline_cancellation_token();
/// let mut pipeline = DeletionPipeline::new(config, cancellation_token).await.unwrap();
/// pipeline.close_stats_sender();
/// pipeline.run().await;
/// if pipeline.has_error() {
///     eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
/// }
/// # }
/// ```
pub struct DeletionPipeline {
    config: Config,
    target: Storage,
    cancellation_token: PipelineCancellationToken,
    stats_receiver: Receiver<DeletionStatistics>,
    governor: Arc<RateGovernor>,
    reporter: Arc<dyn ProgressReporter>,
    has_error: Arc<AtomicBool>,
    has_panic: Arc<AtomicBool>,
    has_warning: Arc<AtomicBool>,
    errors: Arc<Mutex<VecDeque<anyhow::Error>>>,
    ready: bool,
    deletion_stats_report: Arc<DeletionStatsReport>,
    run_summary: Option<RunSummary>,
}

impl DeletionPipeline {
    /// Create a new DeletionPipeline against the BigCommerce API.
    ///
    /// Fails when the HTTP client cannot be built from the configuration.
    pub async fn new(config: Config, cancellation_token: PipelineCancellationToken) -> Result<Self> {
        let has_warning = Arc::new(AtomicBool::new(false));
        let (stats_sender, stats_receiver) = async_channel::unbounded();

        let target =
            storage::create_storage(config.clone(), stats_sender, has_warning.clone()).await?;

        Ok(Self::assemble(
            config,
            target,
            cancellation_token,
            stats_receiver,
            has_warning,
        ))
    }

    /// Create a pipeline over a caller-provided remote.
    ///
    /// `factory` receives the statistics sender and warning flag the
    /// storage must report through.
    pub fn with_storage<F>(
        config: Config,
        cancellation_token: PipelineCancellationToken,
        factory: F,
    ) -> Self
    where
        F: FnOnce(Sender<DeletionStatistics>, Arc<AtomicBool>) -> Storage,
    {
        let has_warning = Arc::new(AtomicBool::new(false));
        let (stats_sender, stats_receiver) = async_channel::unbounded();
        let target = factory(stats_sender, has_warning.clone());

        Self::assemble(
            config,
            target,
            cancellation_token,
            stats_receiver,
            has_warning,
        )
    }

    /// Replace the default log-line progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn assemble(
        config: Config,
        target: Storage,
        cancellation_token: PipelineCancellationToken,
        stats_receiver: Receiver<DeletionStatistics>,
        has_warning: Arc<AtomicBool>,
    ) -> Self {
        let governor = Arc::new(RateGovernor::new(&config.rate_limit_config));

        Self {
            config,
            target,
            cancellation_token,
            stats_receiver,
            governor,
            reporter: Arc::new(LogProgressReporter),
            has_error: Arc::new(AtomicBool::new(false)),
            has_panic: Arc::new(AtomicBool::new(false)),
            has_warning,
            errors: Arc::new(Mutex::new(VecDeque::new())),
            ready: true,
            deletion_stats_report: Arc::new(DeletionStatsReport::new()),
            run_summary: None,
        }
    }

    /// Run the deletion pipeline.
    ///
    /// 1. Load (or clear) the state for the store
    /// 2. Enumerate every customer
    /// 3. Batch the customers not yet processed and delete them
    /// 4. Record the summary and close the stats channel
    pub async fn run(&mut self) {
        assert!(self.ready, "DeletionPipeline::run() called more than once");
        self.ready = false;

        let start_time = tokio::time::Instant::now();

        match self.execute_pipeline().await {
            Ok(mut summary) => {
                summary.duration = start_time.elapsed();
                self.finish(summary);
            }
            Err(e) if is_cancelled_error(&e) => {
                info!("deletion pipeline has been cancelled before deletion started.");
                self.record_error(e);
            }
            Err(e) => self.record_error(e),
        }

        self.shutdown();
    }

    /// Check if any error occurred during the pipeline execution.
    pub fn has_error(&self) -> bool {
        self.has_error.load(Ordering::SeqCst)
    }

    /// Check if any spawned task panicked during the pipeline execution.
    pub fn has_panic(&self) -> bool {
        self.has_panic.load(Ordering::SeqCst)
    }

    /// Check if any warning occurred during the pipeline execution.
    pub fn has_warning(&self) -> bool {
        self.has_warning.load(Ordering::SeqCst)
    }

    /// Consume and return all accumulated errors.
    ///
    /// Returns `None` if no errors occurred.
    pub fn get_errors_and_consume(&self) -> Option<Vec<anyhow::Error>> {
        if !self.has_error() {
            return None;
        }
        let mut error_list = self.errors.lock().unwrap();
        let mut errors = Vec::with_capacity(error_list.len());
        while let Some(e) = error_list.pop_front() {
            errors.push(e);
        }
        Some(errors)
    }

    /// Get error messages without consuming them.
    ///
    /// Returns `None` if no errors occurred.
    pub fn get_error_messages(&self) -> Option<Vec<String>> {
        if !self.has_error() {
            return None;
        }
        let error_list = self.errors.lock().unwrap();
        Some(error_list.iter().map(|e| e.to_string()).collect())
    }

    /// Get the stats receiver for progress reporting.
    pub fn get_stats_receiver(&self) -> Receiver<DeletionStatistics> {
        self.stats_receiver.clone()
    }

    /// Get a snapshot of the current deletion statistics.
    pub fn get_deletion_stats(&self) -> DeletionStats {
        self.deletion_stats_report.snapshot()
    }

    /// Summary of the finished run. `None` before `run()` or when the run
    /// aborted before deletion started.
    pub fn get_run_summary(&self) -> Option<&RunSummary> {
        self.run_summary.as_ref()
    }

    /// Close the stats sender to signal the progress indicator to finish.
    pub fn close_stats_sender(&self) {
        self.target.get_stats_sender().close();
    }

    // -----------------------------------------------------------------------
    // Internal methods
    // -----------------------------------------------------------------------

    async fn execute_pipeline(&self) -> Result<RunSummary> {
        let state_path = self.config.state_file_path();
        if self.config.clear_state {
            StateStore::clear(&state_path)?;
        }
        let state_store = Arc::new(StateStore::load(&state_path)?);

        let already_processed = state_store.size();
        self.deletion_stats_report
            .set_already_processed(already_processed);
        if already_processed > 0 {
            self.reporter.report_already_processed(already_processed);
            self.target
                .send_stats(DeletionStatistics::AlreadyProcessed(already_processed))
                .await;
        }
        if self.config.dry_run {
            info!("[dry-run] no customers will be deleted.");
        }

        // Stage 1: enumerate
        let (listed, listing) = self.list_target().await?;
        let listed_count = listed.len() as u64;
        self.deletion_stats_report.set_listed_candidates(listed_count);
        state_store.record_total_customers(listing.reported_total.unwrap_or(listed_count));

        let remaining = plan_remaining(listed, &state_store);
        let total = already_processed + remaining.len() as u64;
        let batch_size = self.config.batch_size.max(1) as u64;
        let batches_planned = (remaining.len() as u64).div_ceil(batch_size);
        info!(
            listed = listed_count,
            already_processed = already_processed,
            remaining = remaining.len(),
            total = total,
            batches = batches_planned,
            "Total customers: {total}"
        );

        // Stages 2-4: batch, delete, terminate
        let (outcome_sender, outcome_receiver) = async_channel::unbounded::<BatchOutcome>();
        let terminator_handle =
            self.terminate(outcome_receiver, already_processed, total);
        let (batch_sender, batch_receiver) =
            async_channel::bounded::<Batch>(self.config.max_concurrent.max(1) as usize);
        let worker_handles =
            self.delete_customers(batch_receiver, outcome_sender, state_store.clone());

        let batcher = Batcher::new(self.create_stage(None, Some(batch_sender)));
        let batches_sent = batcher.run(remaining).await;
        drop(batcher);

        for handle in worker_handles {
            if let Err(e) = handle.await {
                self.has_panic.store(true, Ordering::SeqCst);
                error!("delete worker task panicked: {}", e);
                self.record_error(anyhow!("delete worker task panicked: {}", e));
            }
        }

        let report: TerminatorReport = match terminator_handle.await {
            Ok(report) => report,
            Err(e) => {
                self.has_panic.store(true, Ordering::SeqCst);
                error!("terminator task panicked: {}", e);
                return Err(anyhow!("terminator task panicked: {}", e));
            }
        };
        // Batches are already durable in the journal; the next load retries
        // a failed compaction.
        if let Err(e) = state_store.compact().await {
            self.has_warning.store(true, Ordering::SeqCst);
            warn!("state compaction failed: {:#}", e);
        }

        let batches_sent = batches_sent?;

        let interrupted = self.cancellation_token.is_cancelled()
            && (batches_sent < batches_planned || report.outcomes < batches_sent);

        Ok(RunSummary {
            listed: listed_count,
            already_processed,
            total,
            processed: report.snapshot.processed,
            failed_ids: report.failed_ids,
            batches_planned,
            batches_completed: report.outcomes,
            interrupted,
            duration: Duration::ZERO,
        })
    }

    fn finish(&mut self, summary: RunSummary) {
        let duration_sec = format!("{:.3}", summary.duration.as_secs_f64());

        if summary.interrupted {
            warn!(
                processed = summary.processed,
                total = summary.total,
                batches_completed = summary.batches_completed,
                batches_planned = summary.batches_planned,
                "deletion interrupted, run again to resume."
            );
        }

        info!(
            processed = summary.processed,
            total = summary.total,
            failed = summary.failed_ids.len(),
            duration_sec = duration_sec,
            "Deletion finished: {}/{} customers processed, {} failed.",
            summary.processed,
            summary.total,
            summary.failed_ids.len()
        );

        if !summary.failed_ids.is_empty() {
            error!(
                failed_ids = join_ids(&summary.failed_ids),
                "customers that could not be deleted."
            );
            self.record_error(anyhow!(BcrmError::PartialFailure {
                processed: summary.processed,
                failed: summary.failed_ids.len() as u64,
            }));
        }
        if summary.interrupted && !self.has_error() {
            self.record_error(anyhow!(BcrmError::Cancelled));
        }

        self.run_summary = Some(summary);
    }

    /// Record an error and set the error flag.
    fn record_error(&self, error: anyhow::Error) {
        self.has_error.store(true, Ordering::SeqCst);
        self.errors.lock().unwrap().push_back(error);
    }

    /// Shutdown: close stats sender.
    fn shutdown(&self) {
        self.close_stats_sender();
    }

    fn create_stage<In, Out>(
        &self,
        receiver: Option<Receiver<In>>,
        sender: Option<Sender<Out>>,
    ) -> Stage<In, Out> {
        Stage::new(
            self.config.clone(),
            dyn_clone::clone_box(&*self.target),
            self.governor.clone(),
            receiver,
            sender,
            self.cancellation_token.clone(),
            self.has_warning.clone(),
        )
    }

    // -----------------------------------------------------------------------
    // Pipeline stages
    // -----------------------------------------------------------------------

    /// Stage 1: run the CustomerLister to completion and collect its IDs.
    async fn list_target(&self) -> Result<(Vec<CustomerId>, ListingSummary)> {
        let (sender, receiver) =
            async_channel::bounded::<CustomerId>(self.config.page_size.max(1) as usize);
        let lister = CustomerLister::new(self.create_stage(None, Some(sender)));

        let lister_handle = tokio::spawn(async move { lister.list_target().await });

        let mut listed = Vec::new();
        while let Ok(id) = receiver.recv().await {
            listed.push(id);
        }

        match lister_handle.await {
            Ok(Ok(summary)) => {
                debug!(
                    listed = summary.listed,
                    pages = summary.pages,
                    "customer lister completed successfully."
                );
                Ok((listed, summary))
            }
            Ok(Err(e)) => {
                if !is_cancelled_error(&e) {
                    self.cancellation_token.cancel();
                    error!("customer lister failed: {:#}", e);
                }
                Err(e)
            }
            Err(e) => {
                self.cancellation_token.cancel();
                self.has_panic.store(true, Ordering::SeqCst);
                error!("customer lister task panicked: {}", e);
                Err(anyhow!("customer lister task panicked: {}", e))
            }
        }
    }

    /// Stage 3: spawn `max_concurrent` CustomerDeleter workers sharing one
    /// input channel.
    fn delete_customers(
        &self,
        batches: Receiver<Batch>,
        outcome_sender: Sender<BatchOutcome>,
        state_store: Arc<StateStore>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.max_concurrent as usize);

        for worker_index in 0..self.config.max_concurrent.max(1) {
            let stage = self.create_stage(Some(batches.clone()), Some(outcome_sender.clone()));
            let mut customer_deleter = CustomerDeleter::new(
                stage,
                worker_index,
                state_store.clone(),
                self.deletion_stats_report.clone(),
            );

            let has_error = self.has_error.clone();
            let error_list = self.errors.clone();
            let cancellation_token = self.cancellation_token.clone();

            handles.push(tokio::spawn(async move {
                if let Err(e) = customer_deleter.delete().await {
                    cancellation_token.cancel();
                    has_error.store(true, Ordering::SeqCst);
                    error!(worker_index = worker_index, "delete worker failed: {:#}", e);
                    error_list.lock().unwrap().push_back(e);
                }
            }));
        }

        handles
    }

    /// Stage 4: spawn the Terminator that feeds the progress reporter.
    fn terminate(
        &self,
        outcomes: Receiver<BatchOutcome>,
        already_processed: u64,
        total: u64,
    ) -> JoinHandle<TerminatorReport> {
        let terminator = Terminator::new(
            outcomes,
            self.reporter.clone(),
            self.target.get_stats_sender(),
            already_processed,
            total,
        );

        tokio::spawn(async move { terminator.terminate().await })
    }
}
