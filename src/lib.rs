/*!
# Overview
bcrm-rs deletes every customer of a BigCommerce store, safely and resumably.
Customers are removed in small batches, paced under the API rate limit, and
progress is saved after each batch so an interrupted run can pick up exactly
where it stopped.

## Features
- **Resumable**: Processed customer IDs are persisted atomically after each batch
- **Rate Limited**: Every API call is admitted by a shared rate governor; `429` responses pause all workers
- **Concurrent**: Up to `max_concurrent` batch deletions in flight
- **Bounded Retry**: Exponential backoff for transient failures, permanent failures are reported
- **Dry-Run**: Rehearse a full run without deleting anything
- **Library-First**: The bcrm CLI is a thin wrapper over this library

## As a Library
All CLI features are available in the library.

Example usage
=============

```toml
[dependencies]
bcrm-rs = "0.1"
tokio = { version = "1", features = ["full"] }
```

```no_run
use bcrm_rs::config::Config;
use bcrm_rs::config::args::parse_from_args;
use bcrm_rs::pipeline::DeletionPipeline;
use bcrm_rs::types::token::create_pipeline_cancellation_token;

#[tokio::main]
async fn main() {
    let args = vec![
        "bcrm",
        "--store-hash",
        "abc123",
        "--access-token",
        "my-token",
        "--dry-run",
    ];

    let parsed_args = parse_from_args(args).unwrap();
    let config = Config::try_from(parsed_args).unwrap();
    let cancellation_token = create_pipeline_cancellation_token();
    let mut pipeline = DeletionPipeline::new(config, cancellation_token)
        .await
        .unwrap();
    pipeline.close_stats_sender();
    pipeline.run().await;

    if pipeline.has_error() {
        eprintln!("{:?}", pipeline.get_errors_and_consume().unwrap()[0]);
    }
}
```
*/

#![allow(clippy::collapsible_if)]
#![allow(clippy::assertions_on_constants)]
#![allow(clippy::unnecessary_unwrap)]

pub mod batcher;
pub mod config;
pub mod deleter;
pub mod governor;
pub mod lister;
pub mod pipeline;
pub mod progress;
pub mod stage;
pub mod state;
pub mod storage;
pub mod terminator;
pub mod types;

pub use config::Config;
pub use config::args::{CLIArgs, build_config_from_args, parse_from_args};
pub use pipeline::{DeletionPipeline, RunSummary};
pub use progress::{LogProgressReporter, ProgressReporter, ProgressSnapshot};
pub use types::error::{BcrmError, exit_code_from_error, is_cancelled_error};
pub use types::token::{PipelineCancellationToken, create_pipeline_cancellation_token};
pub use types::{CustomerId, DeletionStatistics, DeletionStats};

#[cfg(test)]
pub(crate) mod test_utils;

#[cfg(test)]
mod rate_limiting_properties;
#[cfg(test)]
mod resume_properties;
#[cfg(test)]
mod retry_properties;
