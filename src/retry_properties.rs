// Property-based tests for bounded retry with exponential backoff.
//
// The backoff before attempt n is min(initial * 2^(n-2), max). A batch that
// keeps failing with a retriable error is attempted exactly `max_attempts`
// times, then reported as failed while the run continues.

#[cfg(test)]
mod tests {
    use crate::config::{RateLimitConfig, RetryConfig};
    use crate::deleter::{BatchOutcome, CustomerDeleter};
    use crate::governor::RateGovernor;
    use crate::stage::Stage;
    use crate::state::StateStore;
    use crate::test_utils::{MockStorage, customer_ids, make_test_config};
    use crate::types::error::ApiError;
    use crate::types::token::create_pipeline_cancellation_token;
    use crate::types::{Batch, BatchState, DeletionStatsReport};

    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    struct RetryRun {
        outcome: BatchOutcome,
        delete_calls: usize,
        elapsed: Duration,
        retries: u64,
    }

    /// Run one 10-ID batch through a single worker whose first `failures`
    /// delete calls fail with `error`.
    fn run_batch(retry_config: RetryConfig, failures: u32, error: ApiError) -> RetryRun {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async move {
            let dir = tempfile::tempdir().unwrap();
            let mut config = make_test_config(dir.path());
            config.retry_config = retry_config;
            config.rate_limit_config = RateLimitConfig {
                rate_limit: 1000,
                window_seconds: 1,
            };

            let (stats_sender, _stats_receiver) = async_channel::unbounded();
            let storage = MockStorage::new(customer_ids(1..11), stats_sender);
            for _ in 0..failures {
                storage.fail_next_delete(error.clone());
            }

            let (batch_sender, batch_receiver) = async_channel::unbounded();
            let (outcome_sender, outcome_receiver) = async_channel::unbounded();
            batch_sender
                .send(Batch::new(0, customer_ids(1..11)))
                .await
                .unwrap();
            batch_sender.close();

            let state_store = Arc::new(StateStore::load(&config.state_file_path()).unwrap());
            let report = Arc::new(DeletionStatsReport::new());
            let stage = Stage::new(
                config.clone(),
                Box::new(storage.clone()),
                Arc::new(RateGovernor::new(&config.rate_limit_config)),
                Some(batch_receiver),
                Some(outcome_sender),
                create_pipeline_cancellation_token(),
                Arc::new(AtomicBool::new(false)),
            );
            let mut worker = CustomerDeleter::new(stage, 0, state_store, report.clone());

            let start = tokio::time::Instant::now();
            worker.delete().await.unwrap();

            RetryRun {
                outcome: outcome_receiver.recv().await.unwrap(),
                delete_calls: storage.delete_calls().len(),
                elapsed: start.elapsed(),
                retries: report.snapshot().retries,
            }
        })
    }

    fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (1u32..=6, 1u64..=200, 0u64..=2000).prop_map(|(max_attempts, initial, extra)| {
            RetryConfig {
                max_attempts,
                initial_backoff_milliseconds: initial,
                max_backoff_milliseconds: initial + extra,
            }
        })
    }

    fn arb_retriable_error() -> impl Strategy<Value = ApiError> {
        prop_oneof![
            Just(ApiError::TransientNetwork("connection reset".to_string())),
            (500u16..600).prop_map(|status| ApiError::ServerError {
                status,
                message: "server error".to_string(),
            }),
        ]
    }

    // -----------------------------------------------------------------------
    // Backoff schedule
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_backoff_is_monotonic_and_capped(
            config in arb_retry_config(),
            attempts in 2u32..80,
        ) {
            prop_assert_eq!(config.backoff_before_attempt(1), Duration::ZERO);
            prop_assert_eq!(
                config.backoff_before_attempt(2),
                Duration::from_millis(config.initial_backoff_milliseconds)
            );

            let max = Duration::from_millis(config.max_backoff_milliseconds);
            let mut previous = Duration::ZERO;
            for attempt in 2..=attempts {
                let backoff = config.backoff_before_attempt(attempt);
                prop_assert!(backoff >= previous);
                prop_assert!(backoff <= max);
                previous = backoff;
            }
        }

        #[test]
        fn prop_backoff_doubles_until_cap(
            config in arb_retry_config(),
            attempt in 3u32..20,
        ) {
            let previous = config.backoff_before_attempt(attempt - 1);
            let expected = (previous * 2).min(Duration::from_millis(config.max_backoff_milliseconds));
            prop_assert_eq!(config.backoff_before_attempt(attempt), expected);
        }
    }

    // -----------------------------------------------------------------------
    // Retry and failure tracking
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        /// Fewer failures than attempts: the batch eventually succeeds after
        /// waiting out every backoff.
        #[test]
        fn prop_retriable_failures_are_retried_until_success(
            config in arb_retry_config(),
            error in arb_retriable_error(),
            failures_seed in 0u32..6,
        ) {
            let failures = failures_seed % config.max_attempts;
            let run = run_batch(config, failures, error);

            prop_assert_eq!(run.outcome.state, BatchState::Succeeded);
            prop_assert_eq!(run.outcome.attempts, failures + 1);
            prop_assert_eq!(run.delete_calls, failures as usize + 1);
            prop_assert_eq!(run.retries, failures as u64);

            let waited: Duration = (2..=failures + 1)
                .map(|attempt| config.backoff_before_attempt(attempt))
                .sum();
            prop_assert!(run.elapsed >= waited);
        }

        /// Persistent retriable failures stop after `max_attempts` calls.
        #[test]
        fn prop_exhausted_retries_fail_after_max_attempts(
            config in arb_retry_config(),
            error in arb_retriable_error(),
        ) {
            let run = run_batch(config, config.max_attempts + 2, error.clone());

            prop_assert_eq!(run.outcome.state, BatchState::FailedFatal);
            prop_assert_eq!(run.outcome.attempts, config.max_attempts);
            prop_assert_eq!(run.delete_calls, config.max_attempts as usize);
            prop_assert_eq!(run.outcome.error, Some(error));
        }

        /// Permanent rejections are never retried.
        #[test]
        fn prop_client_rejection_is_not_retried(
            config in arb_retry_config(),
            status in prop_oneof![Just(400u16), Just(404u16), Just(409u16), Just(422u16)],
        ) {
            let error = ApiError::ClientRejection {
                status,
                message: "rejected".to_string(),
            };
            let run = run_batch(config, 1, error);

            prop_assert_eq!(run.outcome.state, BatchState::FailedFatal);
            prop_assert_eq!(run.outcome.attempts, 1);
            prop_assert_eq!(run.delete_calls, 1);
            prop_assert_eq!(run.retries, 0);
        }
    }
}
