//! OS signal handling for graceful shutdown.

use tokio::sync::watch;
use tracing::{error, info};

/// Flip `shutdown` to `true` on the first SIGTERM or SIGINT.
///
/// If no handler can be installed the sender is kept alive, so the service
/// runs until killed rather than stopping at once.
pub fn install(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        if wait_for_signal().await {
            if shutdown.send(true).is_err() {
                info!("consumer already stopped");
            }
        } else {
            shutdown.closed().await;
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            return false;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to install SIGINT handler");
            return false;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }
    true
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("received Ctrl+C, shutting down");
            true
        }
        Err(e) => {
            error!(error = %e, "failed to listen for Ctrl+C");
            false
        }
    }
}
