pub mod args;

use std::path::PathBuf;
use std::time::Duration;

use crate::types::{StoreCredentials, StoreTarget};

/// Main configuration for the bcrm-rs deletion pipeline.
///
/// Holds everything needed to run a [`DeletionPipeline`](crate::DeletionPipeline):
/// the target store and its credential, pacing and concurrency limits, the
/// retry policy, the state directory and logging settings.
///
/// # Quick Start
///
/// ```
/// use bcrm_rs::Config;
///
/// let config = Config::for_store("abc123", "my-token");
/// assert_eq!(config.batch_size, 10);
/// assert_eq!(config.max_concurrent, 5);
/// assert_eq!(config.rate_limit_config.rate_limit, 150);
/// ```
///
/// Then customize fields as needed:
///
/// ```
/// use bcrm_rs::Config;
///
/// let mut config = Config::for_store("abc123", "my-token");
/// config.dry_run = true;
/// config.state_dir = "/var/lib/bcrm".into();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub target: StoreTarget,
    pub state_dir: PathBuf,
    pub clear_state: bool,
    pub show_no_progress: bool,
    pub client_config: ClientConfig,
    pub rate_limit_config: RateLimitConfig,
    pub retry_config: RetryConfig,
    pub tracing_config: Option<TracingConfig>,
    pub batch_size: u16,
    pub max_concurrent: u16,
    pub page_size: u16,
    pub dry_run: bool,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

impl Config {
    /// Create a `Config` with CLI defaults for the given store hash and token.
    pub fn for_store(store_hash: &str, access_token: &str) -> Self {
        Config {
            target: StoreTarget {
                store_hash: store_hash.to_string(),
                api_base_url: None,
                credential: StoreCredentials {
                    access_token: access_token.to_string(),
                },
            },
            ..Config::default()
        }
    }

    /// Location of the state file for the configured store.
    ///
    /// Dry runs keep their own file so a rehearsal never marks customers as
    /// done for the live run.
    pub fn state_file_path(&self) -> PathBuf {
        let file_name = if self.dry_run {
            format!("{}.dry-run.json", self.target.store_hash)
        } else {
            format!("{}.json", self.target.store_hash)
        };
        self.state_dir.join(file_name)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            target: StoreTarget {
                store_hash: String::new(),
                api_base_url: None,
                credential: StoreCredentials::default(),
            },
            state_dir: PathBuf::from("./state"),
            clear_state: false,
            show_no_progress: false,
            client_config: ClientConfig::default(),
            rate_limit_config: RateLimitConfig::default(),
            retry_config: RetryConfig::default(),
            tracing_config: None,
            batch_size: 10,
            max_concurrent: 5,
            page_size: 250,
            dry_run: false,
            auto_complete_shell: None,
        }
    }
}

/// HTTP client timeouts and error reporting.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    /// Longest error response body carried into error messages. `0` keeps
    /// the whole body.
    pub error_body_max_chars: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            request_timeout_milliseconds: None,
            connect_timeout_milliseconds: None,
            error_body_max_chars: 512,
        }
    }
}

/// Remote call budget: `rate_limit` calls per `window_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub rate_limit: u32,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            rate_limit: 150,
            window_seconds: 30,
        }
    }
}

impl RateLimitConfig {
    /// Minimum spacing between two admissions.
    pub fn interval(&self) -> Duration {
        let rate = self.rate_limit.max(1);
        Duration::from_secs(self.window_seconds) / rate
    }
}

/// Bounded exponential backoff shared by listing and deletion.
///
/// Attempt 1 is the initial call. Before attempt `n >= 2` the caller waits
/// `min(initial_backoff * 2^(n-2), max_backoff)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
    pub max_backoff_milliseconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 5,
            initial_backoff_milliseconds: 1000,
            max_backoff_milliseconds: 60_000,
        }
    }
}

impl RetryConfig {
    pub fn backoff_before_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(32);
        let millis = self
            .initial_backoff_milliseconds
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_milliseconds);
        Duration::from_millis(millis)
    }
}

/// Tracing (logging) configuration.
#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub http_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}
