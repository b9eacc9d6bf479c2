use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Detects signals sent to the process and cancels `cancelation`. Also returns when something
/// else cancelled it first.
///
/// On Windows detached processes can't detect signals sent to them, so there the daemon is
/// usually stopped by `traco kill`.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => error!("Failed to listen for shutdown signal {e:?}"),
            }
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => (),
    };
}
