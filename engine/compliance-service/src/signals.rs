//! Signal handling for graceful shutdown

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::service::ServiceState;

/// Resolve the returned receiver on Ctrl+C or SIGTERM
pub fn setup_signal_handlers() -> Result<oneshot::Receiver<()>> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let sigterm = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    signal_hook::flag::register(signal_hook::consts::SIGTERM, sigterm.clone())
        .context("Failed to register SIGTERM handler")?;

    tokio::spawn(async move {
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Ctrl+C signal received"),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C signal: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        let terminate = async {
            while !sigterm.load(Ordering::Relaxed) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            info!("SIGTERM signal received");
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        let _ = shutdown_tx.send(());
    });

    Ok(shutdown_rx)
}

/// Wait for the signal listener. Returns false, after logging, if it went
/// away without delivering a signal; shutdown proceeds either way.
pub async fn wait_for_shutdown(shutdown_rx: oneshot::Receiver<()>) -> bool {
    match shutdown_rx.await {
        Ok(()) => true,
        Err(e) => {
            warn!("Signal listener stopped without a shutdown signal: {}", e);
            false
        }
    }
}

/// Stop scheduling and give in-flight cycles time to finish
pub async fn graceful_shutdown(service_state: Arc<ServiceState>) -> Result<()> {
    info!("Starting graceful shutdown...");

    if !service_state.shutdown().await {
        warn!(
            timeout_secs = service_state.config.service.shutdown_timeout_secs,
            "In-flight compliance cycles did not finish within timeout"
        );
    }

    info!("Graceful shutdown complete");
    Ok(())
}
