use crate::config::{ClientConfig, Config, RateLimitConfig, RetryConfig, TracingConfig};
use crate::types::{StoreCredentials, StoreTarget};
use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::ffi::OsString;
use std::path::PathBuf;

pub mod value_parser;

// ---------------------------------------------------------------------------
// Default constants
// ---------------------------------------------------------------------------

const DEFAULT_RATE_LIMIT: u32 = 150;
const DEFAULT_RATE_WINDOW_SECONDS: u64 = 30;
const DEFAULT_BATCH_SIZE: u16 = 10;
const DEFAULT_MAX_CONCURRENT: u16 = 5;
const DEFAULT_PAGE_SIZE: u16 = 250;
const DEFAULT_STATE_DIR: &str = "./state";
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 1000;
const DEFAULT_MAX_BACKOFF_MILLISECONDS: u64 = 60_000;
const DEFAULT_ERROR_BODY_MAX_CHARS: usize = 512;
const DEFAULT_DRY_RUN: bool = false;
const DEFAULT_CLEAR_STATE: bool = false;
const DEFAULT_SHOW_NO_PROGRESS: bool = false;
const DEFAULT_JSON_TRACING: bool = false;
const DEFAULT_HTTP_TRACING: bool = false;
const DEFAULT_SPAN_EVENTS_TRACING: bool = false;
const DEFAULT_DISABLE_COLOR_TRACING: bool = false;

/// Largest page the customer listing endpoint returns.
pub const MAX_PAGE_SIZE: u16 = 250;
/// Largest number of IDs accepted by one delete call.
pub const MAX_BATCH_SIZE: u16 = 10;

// ---------------------------------------------------------------------------
// Error messages
// ---------------------------------------------------------------------------

const ERROR_MESSAGE_RATE_LIMIT_ZERO: &str = "Rate limit must be at least 1.";
const ERROR_MESSAGE_RATE_WINDOW_ZERO: &str = "Rate window must be at least 1 second.";
const ERROR_MESSAGE_BATCH_SIZE_ZERO: &str = "Batch size must be at least 1.";
const ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE: &str = "Batch size must be at most 10 (API limit).";
const ERROR_MESSAGE_MAX_CONCURRENT_ZERO: &str = "Max concurrent must be at least 1.";
const ERROR_MESSAGE_PAGE_SIZE_ZERO: &str = "Page size must be at least 1.";
const ERROR_MESSAGE_PAGE_SIZE_TOO_LARGE: &str = "Page size must be at most 250 (API limit).";
const ERROR_MESSAGE_MAX_ATTEMPTS_ZERO: &str = "Max attempts must be at least 1.";
const ERROR_MESSAGE_BACKOFF_ORDER: &str =
    "Max backoff must be greater than or equal to initial backoff.";
const ERROR_MESSAGE_STORE_HASH: &str =
    "Store hash must contain only ASCII letters, digits, '-' or '_'.";

fn check_store_hash(s: &str) -> Result<String, String> {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Ok(s.to_string())
    } else {
        Err(ERROR_MESSAGE_STORE_HASH.to_string())
    }
}

// ---------------------------------------------------------------------------
// CLIArgs (clap-derived argument struct)
// ---------------------------------------------------------------------------

/// bcrm - Resumable bulk customer deletion for BigCommerce stores.
///
/// Deletes every customer of a store in small batches, paced under the API
/// rate limit. Progress is saved after each batch so an interrupted run can
/// be restarted without deleting anything twice.
///
/// Example:
///   bcrm --store-hash abc123 --access-token $TOKEN --dry-run
///   bcrm --store-hash abc123 --access-token $TOKEN --max-concurrent 3 -v
#[derive(Parser, Clone, Debug)]
#[command(name = "bcrm", version, about, long_about = None)]
pub struct CLIArgs {
    /// Store hash identifying the BigCommerce store.
    #[arg(
        long,
        env,
        value_parser = check_store_hash,
        default_value_if("auto_complete_shell", clap::builder::ArgPredicate::IsPresent, "ignored"),
        required = false,
        help_heading = "Store"
    )]
    pub store_hash: String,

    /// API access token (X-Auth-Token).
    #[arg(
        long,
        env,
        hide_env_values = true,
        value_parser = NonEmptyStringValueParser::new(),
        default_value_if("auto_complete_shell", clap::builder::ArgPredicate::IsPresent, "ignored"),
        required = false,
        help_heading = "Store"
    )]
    pub access_token: String,

    /// Override the API base URL (default: https://api.bigcommerce.com/stores/<STORE_HASH>/v3).
    #[arg(long, env, value_parser = value_parser::url::check_scheme, help_heading = "Store")]
    pub api_base_url: Option<String>,

    // -----------------------------------------------------------------------
    // General options
    // -----------------------------------------------------------------------
    /// Simulation mode. Lists customers and records progress but does not delete.
    #[arg(short = 'd', long, env, default_value_t = DEFAULT_DRY_RUN, help_heading = "General")]
    pub dry_run: bool,

    /// Don't show the progress line.
    #[arg(long, env, default_value_t = DEFAULT_SHOW_NO_PROGRESS, help_heading = "General")]
    pub show_no_progress: bool,

    // -----------------------------------------------------------------------
    // State options
    // -----------------------------------------------------------------------
    /// Directory holding the per-store progress file.
    #[arg(long, env, default_value = DEFAULT_STATE_DIR, help_heading = "State")]
    pub state_dir: PathBuf,

    /// Forget previously processed customers before starting.
    #[arg(long, env, default_value_t = DEFAULT_CLEAR_STATE, help_heading = "State")]
    pub clear_state: bool,

    // -----------------------------------------------------------------------
    // Performance options
    // -----------------------------------------------------------------------
    /// Number of API calls allowed per rate window. Default: 150.
    #[arg(long, env, default_value_t = DEFAULT_RATE_LIMIT, help_heading = "Performance")]
    pub rate_limit: u32,

    /// Length of the rate window in seconds. Default: 30.
    #[arg(long, env, default_value_t = DEFAULT_RATE_WINDOW_SECONDS, help_heading = "Performance")]
    pub rate_window_seconds: u64,

    /// Number of customers per delete request (1-10). Default: 10.
    #[arg(long, env, default_value_t = DEFAULT_BATCH_SIZE, help_heading = "Performance")]
    pub batch_size: u16,

    /// Maximum number of delete requests in flight. Default: 5.
    #[arg(long, env, default_value_t = DEFAULT_MAX_CONCURRENT, help_heading = "Performance")]
    pub max_concurrent: u16,

    /// Customers per listing page (1-250). Default: 250.
    #[arg(long, env, default_value_t = DEFAULT_PAGE_SIZE, help_heading = "Performance")]
    pub page_size: u16,

    // -----------------------------------------------------------------------
    // Retry options
    // -----------------------------------------------------------------------
    /// Total attempts per batch or listing page, including the first. Default: 5.
    #[arg(long, env, default_value_t = DEFAULT_MAX_ATTEMPTS, help_heading = "Retry")]
    pub max_attempts: u32,

    /// Backoff before the first retry, doubled on each further retry. Default: 1000.
    #[arg(long, env, default_value_t = DEFAULT_INITIAL_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub initial_backoff_milliseconds: u64,

    /// Upper bound for a single backoff. Default: 60000.
    #[arg(long, env, default_value_t = DEFAULT_MAX_BACKOFF_MILLISECONDS, help_heading = "Retry")]
    pub max_backoff_milliseconds: u64,

    // -----------------------------------------------------------------------
    // Timeout options
    // -----------------------------------------------------------------------
    /// Whole-request timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub request_timeout_milliseconds: Option<u64>,

    /// Connection timeout in milliseconds.
    #[arg(long, env, help_heading = "Timeout")]
    pub connect_timeout_milliseconds: Option<u64>,

    /// Longest remote error body kept in error messages, 0 for the whole body.
    /// Longer bodies are logged in full at debug level. Default: 512.
    #[arg(long, env, default_value_t = DEFAULT_ERROR_BODY_MAX_CHARS, help_heading = "Logging")]
    pub error_body_max_chars: usize,

    // -----------------------------------------------------------------------
    // Logging options
    // -----------------------------------------------------------------------
    /// Verbosity level. -q (quiet), default (info), -v, -vv.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    /// Output logs in JSON format.
    #[arg(long, env, default_value_t = DEFAULT_JSON_TRACING, help_heading = "Logging")]
    pub json_tracing: bool,

    /// Include HTTP client (reqwest/hyper) events in the log.
    #[arg(long, env, default_value_t = DEFAULT_HTTP_TRACING, help_heading = "Logging")]
    pub http_tracing: bool,

    /// Enable tracing span events.
    #[arg(long, env, default_value_t = DEFAULT_SPAN_EVENTS_TRACING, help_heading = "Logging")]
    pub span_events_tracing: bool,

    /// Disable colored output in logs.
    #[arg(long, env, default_value_t = DEFAULT_DISABLE_COLOR_TRACING, help_heading = "Logging")]
    pub disable_color_tracing: bool,

    // -----------------------------------------------------------------------
    // Advanced options
    // -----------------------------------------------------------------------
    /// Generate shell completions.
    #[arg(long, env, help_heading = "Advanced")]
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

/// Parse command-line arguments into a `CLIArgs` struct.
///
/// # Example
///
/// ```
/// use bcrm_rs::config::args::parse_from_args;
///
/// let args = vec!["bcrm", "--store-hash", "abc123", "--access-token", "t", "--dry-run"];
/// let cli_args = parse_from_args(args).unwrap();
/// assert!(cli_args.dry_run);
/// ```
pub fn parse_from_args<I, T>(args: I) -> Result<CLIArgs, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    CLIArgs::try_parse_from(args)
}

/// Parse arguments and build a Config in one step.
pub fn build_config_from_args<I, T>(args: I) -> Result<Config, String>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = CLIArgs::try_parse_from(args).map_err(|e| e.to_string())?;
    Config::try_from(cli_args)
}

// ---------------------------------------------------------------------------
// Validation and Config conversion
// ---------------------------------------------------------------------------

impl CLIArgs {
    fn validate(&self) -> Result<(), String> {
        if self.rate_limit == 0 {
            return Err(ERROR_MESSAGE_RATE_LIMIT_ZERO.to_string());
        }
        if self.rate_window_seconds == 0 {
            return Err(ERROR_MESSAGE_RATE_WINDOW_ZERO.to_string());
        }
        if self.batch_size == 0 {
            return Err(ERROR_MESSAGE_BATCH_SIZE_ZERO.to_string());
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ERROR_MESSAGE_BATCH_SIZE_TOO_LARGE.to_string());
        }
        if self.max_concurrent == 0 {
            return Err(ERROR_MESSAGE_MAX_CONCURRENT_ZERO.to_string());
        }
        if self.page_size == 0 {
            return Err(ERROR_MESSAGE_PAGE_SIZE_ZERO.to_string());
        }
        if self.page_size > MAX_PAGE_SIZE {
            return Err(ERROR_MESSAGE_PAGE_SIZE_TOO_LARGE.to_string());
        }
        if self.max_attempts == 0 {
            return Err(ERROR_MESSAGE_MAX_ATTEMPTS_ZERO.to_string());
        }
        if self.max_backoff_milliseconds < self.initial_backoff_milliseconds {
            return Err(ERROR_MESSAGE_BACKOFF_ORDER.to_string());
        }
        Ok(())
    }

    fn build_tracing_config(&self) -> Option<TracingConfig> {
        let log_level = self.verbosity.log_level()?;

        Some(TracingConfig {
            tracing_level: log_level,
            json_tracing: self.json_tracing,
            http_tracing: self.http_tracing,
            span_events_tracing: self.span_events_tracing,
            disable_color_tracing: self.disable_color_tracing,
        })
    }
}

impl TryFrom<CLIArgs> for Config {
    type Error = String;

    fn try_from(args: CLIArgs) -> Result<Self, Self::Error> {
        args.validate()?;

        let tracing_config = args.build_tracing_config();

        Ok(Config {
            target: StoreTarget {
                store_hash: args.store_hash,
                api_base_url: args.api_base_url,
                credential: StoreCredentials {
                    access_token: args.access_token,
                },
            },
            state_dir: args.state_dir,
            clear_state: args.clear_state,
            show_no_progress: args.show_no_progress,
            client_config: ClientConfig {
                request_timeout_milliseconds: args.request_timeout_milliseconds,
                connect_timeout_milliseconds: args.connect_timeout_milliseconds,
                error_body_max_chars: args.error_body_max_chars,
            },
            rate_limit_config: RateLimitConfig {
                rate_limit: args.rate_limit,
                window_seconds: args.rate_window_seconds,
            },
            retry_config: RetryConfig {
                max_attempts: args.max_attempts,
                initial_backoff_milliseconds: args.initial_backoff_milliseconds,
                max_backoff_milliseconds: args.max_backoff_milliseconds,
            },
            tracing_config,
            batch_size: args.batch_size,
            max_concurrent: args.max_concurrent,
            page_size: args.page_size,
            dry_run: args.dry_run,
            auto_complete_shell: args.auto_complete_shell,
        })
    }
}
