// Progress indicator for the bcrm CLI.
//
// Displays real-time deletion progress using indicatif and moving averages.
// Reads DeletionStatistics from an async channel and updates a progress line.

use std::io;
use std::io::Write;

use async_channel::Receiver;
use bcrm_rs::types::DeletionStatistics;
use indicatif::{HumanCount, HumanDuration, ProgressBar, ProgressStyle};
use simple_moving_average::{SMA, SumTreeSMA};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::info;

/// Summary returned by [`show_indicator`] after the stats channel closes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorSummary {
    pub listed_count: u64,
    pub already_processed_count: u64,
    pub deleted_count: u64,
    pub failed_count: u64,
    pub retry_count: u64,
    pub processed: u64,
    pub total: u64,
}

impl IndicatorSummary {
    fn apply(&mut self, stats: DeletionStatistics) -> u64 {
        match stats {
            DeletionStatistics::CandidatesListed(count) => self.listed_count = count,
            DeletionStatistics::AlreadyProcessed(count) => self.already_processed_count = count,
            DeletionStatistics::BatchComplete { count, .. } => {
                self.deleted_count += count;
                return count;
            }
            DeletionStatistics::BatchRetry { .. } => self.retry_count += 1,
            DeletionStatistics::BatchFailed { count, .. } => self.failed_count += count,
            DeletionStatistics::Progress { processed, total } => {
                self.processed = processed;
                self.total = total;
            }
        }
        0
    }

    fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.processed as f64 / self.total as f64 * 100.0
    }
}

/// Moving average window in seconds (samples).
const MOVING_AVERAGE_PERIOD_SECS: usize = 10;

/// How often (in seconds) to refresh the progress display.
const REFRESH_INTERVAL: f32 = 1.0;

/// Spawn a background task that reads deletion statistics from the channel
/// and displays progress using indicatif.
///
/// The task runs until `stats_receiver` is closed.
/// Returns a `JoinHandle` that should be awaited after the pipeline finishes.
pub fn show_indicator(
    stats_receiver: Receiver<DeletionStatistics>,
    show_progress: bool,
    show_result: bool,
    dry_run: bool,
) -> JoinHandle<IndicatorSummary> {
    let progress_text = ProgressBar::new(0);
    if let Ok(progress_style) = ProgressStyle::with_template("{wide_msg}") {
        progress_text.set_style(progress_style);
    }

    tokio::spawn(async move {
        let start_time = Instant::now();

        let mut ma_deleted_count = SumTreeSMA::<_, u64, MOVING_AVERAGE_PERIOD_SECS>::new();
        let mut summary = IndicatorSummary::default();

        loop {
            let mut period_count: u64 = 0;

            let period = Instant::now();
            loop {
                while let Ok(stats) = stats_receiver.try_recv() {
                    period_count += summary.apply(stats);
                }

                if REFRESH_INTERVAL < period.elapsed().as_secs_f32() {
                    break;
                }

                if stats_receiver.is_closed() {
                    while let Ok(stats) = stats_receiver.try_recv() {
                        summary.apply(stats);
                    }

                    // --- FINAL SUMMARY ---
                    let elapsed = start_time.elapsed();
                    let elapsed_secs_f64 = elapsed.as_secs_f64();

                    let mut customers_per_sec = (summary.deleted_count as f64 / elapsed_secs_f64) as u64;

                    if elapsed_secs_f64 < REFRESH_INTERVAL as f64 {
                        customers_per_sec = summary.deleted_count;
                    }
                    if dry_run {
                        customers_per_sec = 0;
                    }

                    info!(
                        message = "deletion summary",
                        listed = summary.listed_count,
                        already_processed = summary.already_processed_count,
                        deleted_customers = summary.deleted_count,
                        deleted_customers_per_sec = customers_per_sec,
                        failed = summary.failed_count,
                        retries = summary.retry_count,
                        duration_sec = elapsed_secs_f64,
                    );

                    if show_result {
                        if let Ok(style) = ProgressStyle::with_template("{msg}") {
                            progress_text.set_style(style);
                        }

                        progress_text.finish_with_message(format!(
                            "processed {}/{} customers ({:.1}%) | {:>3} customers/sec,  deleted {} customers,  failed {} customers,  retries {},  duration {}",
                            summary.processed,
                            summary.total,
                            summary.percentage(),
                            HumanCount(customers_per_sec),
                            summary.deleted_count,
                            summary.failed_count,
                            summary.retry_count,
                            HumanDuration(elapsed),
                        ));

                        println!();
                        let _ = io::stdout().flush();
                    }

                    return summary;
                }

                tokio::time::sleep(std::time::Duration::from_secs_f32(0.05)).await;
            }

            if !dry_run {
                ma_deleted_count.add_sample(period_count);
            }

            if show_progress {
                progress_text.set_message(format!(
                    "processed {}/{} customers ({:.1}%) | {:>3} customers/sec,  failed {} customers,  retries {}",
                    summary.processed,
                    summary.total,
                    summary.percentage(),
                    HumanCount(ma_deleted_count.get_average()),
                    summary.failed_count,
                    summary.retry_count,
                ));
            }
        }
    })
}
