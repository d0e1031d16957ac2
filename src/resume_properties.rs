// Property-based tests for resumable, idempotent deletion.
//
// However a run is interrupted, restarting it deletes every remaining
// customer exactly once. Re-running a completed store deletes nothing, and
// a dry run never touches the remote.

#[cfg(test)]
mod tests {
    use crate::config::{Config, RateLimitConfig};
    use crate::pipeline::{DeletionPipeline, RunSummary};
    use crate::state::StateStore;
    use crate::storage::Storage;
    use crate::test_utils::{MockStorage, customer_ids, make_test_config};
    use crate::types::CustomerId;
    use crate::types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};

    use proptest::prelude::*;
    use std::collections::HashSet;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn run_pipeline(
        config: &Config,
        storage: &MockStorage,
        token: PipelineCancellationToken,
    ) -> Option<RunSummary> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut pipeline =
                DeletionPipeline::with_storage(config.clone(), token, |stats_sender, _| {
                    Box::new(storage.reattach(stats_sender)) as Storage
                });
            pipeline.run().await;
            pipeline.get_run_summary().cloned()
        })
    }

    fn fast_config(dir: &std::path::Path, batch_size: u16, max_concurrent: u16) -> Config {
        let mut config = make_test_config(dir);
        config.batch_size = batch_size;
        config.max_concurrent = max_concurrent;
        config.page_size = 50;
        config.rate_limit_config = RateLimitConfig {
            rate_limit: 1000,
            window_seconds: 1,
        };
        config
    }

    fn assert_deleted_exactly_once(storage: &MockStorage, expected: &[CustomerId]) {
        let deleted = storage.deleted_ids();
        let unique: HashSet<CustomerId> = deleted.iter().copied().collect();
        assert_eq!(unique.len(), deleted.len(), "a customer was deleted twice");
        assert_eq!(unique, expected.iter().copied().collect::<HashSet<_>>());
    }

    // -----------------------------------------------------------------------
    // Resume
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_interrupted_run_resumes_without_repeats(
            customers in 1u64..300,
            batch_size in 1u16..=10,
            max_concurrent in 1u16..=5,
            interrupt_after in 1usize..40,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let config = fast_config(dir.path(), batch_size, max_concurrent);
            let (stats_sender, _) = async_channel::unbounded();
            let all = customer_ids(1..customers + 1);
            let storage = MockStorage::new(all.clone(), stats_sender);

            let token = create_pipeline_cancellation_token();
            storage.cancel_after_deletes(interrupt_after, token.clone());
            run_pipeline(&config, &storage, token);

            let saved = StateStore::load(&config.state_file_path()).unwrap();
            let deleted: HashSet<CustomerId> = storage.deleted_ids().into_iter().collect();
            prop_assert_eq!(
                saved.processed_ids().into_iter().collect::<HashSet<_>>(),
                deleted
            );

            let summary = run_pipeline(&config, &storage, create_pipeline_cancellation_token())
                .unwrap();

            prop_assert!(summary.is_complete());
            prop_assert_eq!(summary.total, customers);
            prop_assert_eq!(summary.processed, customers);
            prop_assert!(storage.remaining().is_empty());
            assert_deleted_exactly_once(&storage, &all);
        }

        #[test]
        fn prop_rerun_after_completion_is_a_noop(
            customers in 0u64..200,
            batch_size in 1u16..=10,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let config = fast_config(dir.path(), batch_size, 3);
            let (stats_sender, _) = async_channel::unbounded();
            let storage = MockStorage::new(customer_ids(1..customers + 1), stats_sender);

            run_pipeline(&config, &storage, create_pipeline_cancellation_token());
            let calls = storage.delete_calls().len();

            let summary = run_pipeline(&config, &storage, create_pipeline_cancellation_token())
                .unwrap();

            prop_assert_eq!(storage.delete_calls().len(), calls);
            prop_assert_eq!(summary.already_processed, customers);
            prop_assert_eq!(summary.batches_planned, 0);
        }

        #[test]
        fn prop_dry_run_never_deletes(
            customers in 0u64..200,
            batch_size in 1u16..=10,
            max_concurrent in 1u16..=5,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let mut config = fast_config(dir.path(), batch_size, max_concurrent);
            config.dry_run = true;
            let (stats_sender, _) = async_channel::unbounded();
            let storage = MockStorage::new(customer_ids(1..customers + 1), stats_sender);

            let summary = run_pipeline(&config, &storage, create_pipeline_cancellation_token())
                .unwrap();

            prop_assert!(storage.delete_calls().is_empty());
            prop_assert_eq!(storage.remaining().len() as u64, customers);
            prop_assert_eq!(summary.processed, customers);
        }

        #[test]
        fn prop_batches_respect_size_limit(
            customers in 0u64..200,
            batch_size in 1u16..=10,
            max_concurrent in 1u16..=5,
        ) {
            let dir = tempfile::tempdir().unwrap();
            let config = fast_config(dir.path(), batch_size, max_concurrent);
            let (stats_sender, _) = async_channel::unbounded();
            let all = customer_ids(1..customers + 1);
            let storage = MockStorage::new(all.clone(), stats_sender);

            run_pipeline(&config, &storage, create_pipeline_cancellation_token());

            let calls = storage.delete_calls();
            prop_assert_eq!(calls.len() as u64, customers.div_ceil(batch_size as u64));
            prop_assert!(calls.iter().all(|call| !call.is_empty() && call.len() <= batch_size as usize));
            assert_deleted_exactly_once(&storage, &all);
        }
    }
}
