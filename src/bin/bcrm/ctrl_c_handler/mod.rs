// Ctrl+C signal handler.
//
// Uses tokio::select! to wait for either pipeline cancellation or Ctrl+C signal.
// Workers finish the batch they are submitting, so saved progress stays exact.

use bcrm_rs::PipelineCancellationToken;
use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, warn};

pub fn spawn_ctrl_c_handler(cancellation_token: PipelineCancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = cancellation_token.cancelled() => {
                debug!("cancellation_token canceled.")
            }
            _ = signal::ctrl_c() => {
                warn!("ctrl-c received, finishing in-flight batches and shutting down.");
                cancellation_token.cancel();
            }
        }
    })
}
