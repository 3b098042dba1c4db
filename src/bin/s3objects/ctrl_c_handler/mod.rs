// Cancels the pipeline token on Ctrl+C. Deletions already sent to S3 are not
// rolled back; buffered keys are reported as cancelled.

use s3objects_rs::PipelineCancellationToken;
use tokio::task::JoinHandle;
use tokio::{select, signal};
use tracing::{debug, warn};

pub fn spawn_ctrl_c_handler(cancellation_token: PipelineCancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        select! {
            _ = cancellation_token.cancelled() => {
                debug!("cancellation_token canceled.")
            }
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => warn!("ctrl-c received, shutting down."),
                    Err(e) => warn!(
                        error = e.to_string(),
                        "failed to listen for ctrl-c, shutting down."
                    ),
                }
                cancellation_token.cancel();
            }
        }
    })
}
