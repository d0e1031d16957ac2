use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use tracing::{debug, error, trace, warn};

use bcrm_rs::config::Config;
use bcrm_rs::{
    BcrmError, CLIArgs, DeletionPipeline, create_pipeline_cancellation_token, exit_code_from_error,
    is_cancelled_error,
};

mod ctrl_c_handler;
pub mod indicator;
mod tracing_init;
pub mod ui_config;

const EXIT_CODE_GENERAL_ERROR: i32 = 1;

/// bcrm - Resumable bulk customer deletion for BigCommerce stores.
///
/// This binary is a thin wrapper over the bcrm-rs library.
/// All core functionality is implemented in the library crate.
#[cfg_attr(coverage_nightly, coverage(off))]
#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config_exit_if_err();

    if let Some(shell) = config.auto_complete_shell {
        generate(
            shell,
            &mut CLIArgs::command(),
            "bcrm",
            &mut std::io::stdout(),
        );

        return Ok(());
    }

    start_tracing_if_necessary(&config);

    trace!("config = {:?}", config);

    run(config).await
}

#[cfg_attr(coverage_nightly, coverage(off))]
fn load_config_exit_if_err() -> Config {
    match Config::try_from(CLIArgs::parse()) {
        Ok(config) => config,
        Err(error_message) => {
            clap::Error::raw(clap::error::ErrorKind::ValueValidation, error_message).exit()
        }
    }
}

fn start_tracing_if_necessary(config: &Config) -> bool {
    let Some(tracing_config) = config.tracing_config.as_ref() else {
        return false;
    };

    tracing_init::init_tracing(tracing_config);
    true
}

/// Pick the process exit code for the errors a run left behind.
///
/// An interrupt wins. Otherwise the lowest code is the most severe.
fn exit_code_for_errors(errors: &[anyhow::Error]) -> i32 {
    if errors.iter().any(is_cancelled_error) {
        return BcrmError::Cancelled.exit_code();
    }

    errors
        .iter()
        .map(exit_code_from_error)
        .min()
        .unwrap_or(EXIT_CODE_GENERAL_ERROR)
}

async fn run(config: Config) -> Result<()> {
    let exit_code = {
        let cancellation_token = create_pipeline_cancellation_token();

        ctrl_c_handler::spawn_ctrl_c_handler(cancellation_token.clone());

        let start_time = tokio::time::Instant::now();
        debug!("deletion pipeline start.");

        let mut pipeline = match DeletionPipeline::new(config.clone(), cancellation_token).await {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!("{:#}", e);
                std::process::exit(exit_code_from_error(&e));
            }
        };
        let indicator_join_handle = indicator::show_indicator(
            pipeline.get_stats_receiver(),
            ui_config::is_progress_indicator_needed(&config),
            ui_config::is_show_result_needed(&config),
            config.dry_run,
        );

        pipeline.run().await;
        indicator_join_handle.await?;

        let duration_sec = format!("{:.3}", start_time.elapsed().as_secs_f32());

        let Some(errors) = pipeline.get_errors_and_consume() else {
            debug!(duration_sec = duration_sec, "bcrm has been completed.");
            return Ok(());
        };

        for err in &errors {
            if is_cancelled_error(err) {
                warn!("deletion interrupted, run the same command again to resume.");
                continue;
            }
            error!("{:#}", err);
        }

        let exit_code = exit_code_for_errors(&errors);
        if exit_code == EXIT_CODE_GENERAL_ERROR {
            error!(duration_sec = duration_sec, "bcrm failed.");
            return Err(anyhow::anyhow!("bcrm failed."));
        }
        exit_code
    };

    std::process::exit(exit_code);
}
