// Property-based tests for rate limiting enforcement.
//
// For any rate limit configuration, the rate governor must never admit more
// than `rate_limit` remote calls in any window of `window_seconds`, whether
// callers arrive one at a time or all at once.

#[cfg(test)]
mod tests {
    use crate::config::args::parse_from_args;
    use crate::config::{Config, RateLimitConfig};
    use crate::governor::RateGovernor;

    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn paused_runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap()
    }

    /// Admit `callers` concurrent tasks `per_caller` times each and return
    /// every admission instant, sorted.
    fn admission_times(
        config: RateLimitConfig,
        callers: usize,
        per_caller: usize,
    ) -> (Vec<Instant>, Duration) {
        paused_runtime().block_on(async move {
            let governor = Arc::new(RateGovernor::new(&config));
            let mut handles = Vec::new();
            for _ in 0..callers {
                let governor = governor.clone();
                handles.push(tokio::spawn(async move {
                    let mut times = Vec::with_capacity(per_caller);
                    for _ in 0..per_caller {
                        governor.admit().await;
                        times.push(Instant::now());
                    }
                    times
                }));
            }

            let mut all = Vec::new();
            for handle in handles {
                all.extend(handle.await.unwrap());
            }
            all.sort();
            (all, governor.interval())
        })
    }

    // -----------------------------------------------------------------------
    // Generators
    // -----------------------------------------------------------------------

    fn arb_rate_limit_config() -> impl Strategy<Value = RateLimitConfig> {
        (1u32..=60, 1u64..=10).prop_map(|(rate_limit, window_seconds)| RateLimitConfig {
            rate_limit,
            window_seconds,
        })
    }

    // -----------------------------------------------------------------------
    // Pacing
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Any `rate_limit + 1` consecutive admissions span at least one
        /// full window, so no window ever holds more than `rate_limit`.
        #[test]
        fn prop_admissions_never_exceed_rate_per_window(
            config in arb_rate_limit_config(),
            callers in 1usize..6,
        ) {
            let rate = config.rate_limit as usize;
            let per_caller = (rate * 2).div_ceil(callers) + 1;
            let (times, interval) = admission_times(config, callers, per_caller);

            let effective_window = interval * config.rate_limit;
            for i in 0..times.len().saturating_sub(rate) {
                prop_assert!(
                    times[i + rate] - times[i] >= effective_window,
                    "{} admissions within {:?}",
                    rate + 1,
                    times[i + rate] - times[i]
                );
            }
        }

        /// Consecutive admissions are at least one interval apart, also when
        /// the caller went idle for a while before asking again.
        #[test]
        fn prop_admissions_are_evenly_spaced(
            config in arb_rate_limit_config(),
            idle_fractions in proptest::collection::vec(0u32..400, 1..12),
        ) {
            let (times, interval) = paused_runtime().block_on(async move {
                let governor = RateGovernor::new(&config);
                let interval = governor.interval();
                let mut times = Vec::new();
                for idle_fraction in idle_fractions {
                    // Idle between 0 and 4 intervals, often off the interval grid.
                    tokio::time::sleep(interval * idle_fraction / 100).await;
                    governor.admit().await;
                    times.push(Instant::now());
                    governor.admit().await;
                    times.push(Instant::now());
                }
                (times, interval)
            });

            for pair in times.windows(2) {
                prop_assert!(
                    pair[1] - pair[0] >= interval,
                    "gap {:?} shorter than interval {:?}",
                    pair[1] - pair[0],
                    interval
                );
            }
        }

        /// Nobody is admitted while a remote rate limit suspension is active.
        #[test]
        fn prop_suspension_holds_every_caller(
            retry_after_ms in 1u64..30_000,
            callers in 1usize..8,
        ) {
            let (suspended_at, admitted) = paused_runtime().block_on(async move {
                let governor = Arc::new(RateGovernor::new(&RateLimitConfig::default()));
                governor.admit().await;

                let suspended_at = Instant::now();
                governor.suspend(Duration::from_millis(retry_after_ms));

                let mut handles = Vec::new();
                for _ in 0..callers {
                    let governor = governor.clone();
                    handles.push(tokio::spawn(async move {
                        governor.admit().await;
                        Instant::now()
                    }));
                }
                let mut admitted = Vec::new();
                for handle in handles {
                    admitted.push(handle.await.unwrap());
                }
                (suspended_at, admitted)
            });

            for at in admitted {
                prop_assert!(at - suspended_at >= Duration::from_millis(retry_after_ms));
            }
        }
    }

    // -----------------------------------------------------------------------
    // CLI propagation
    // -----------------------------------------------------------------------

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_rate_limit_cli_propagation(
            rate_limit in 1u32..=100_000,
            window_seconds in 1u64..=3600,
        ) {
            let rate_str = rate_limit.to_string();
            let window_str = window_seconds.to_string();
            let args: Vec<&str> = vec![
                "bcrm",
                "--store-hash",
                "abc123",
                "--access-token",
                "token",
                "--rate-limit",
                &rate_str,
                "--rate-window-seconds",
                &window_str,
            ];

            let cli = parse_from_args(args).unwrap();
            let config = Config::try_from(cli).unwrap();

            prop_assert_eq!(
                config.rate_limit_config,
                RateLimitConfig { rate_limit, window_seconds }
            );
        }
    }

    #[test]
    fn rate_limit_default_is_150_per_30_seconds() {
        let cli = parse_from_args(["bcrm", "--store-hash", "abc123", "--access-token", "t"]).unwrap();
        let config = Config::try_from(cli).unwrap();

        assert_eq!(config.rate_limit_config, RateLimitConfig::default());
        assert_eq!(config.rate_limit_config.interval(), Duration::from_millis(200));
    }

    #[test]
    fn rate_limit_zero_is_rejected() {
        let cli = parse_from_args([
            "bcrm",
            "--store-hash",
            "abc123",
            "--access-token",
            "t",
            "--rate-limit",
            "0",
        ])
        .unwrap();

        assert!(Config::try_from(cli).is_err());
    }
}
