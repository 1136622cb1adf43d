//! Signal handling for the provider process

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{info, warn};

/// Coordinates shutdown between the signal listener and the serve loop
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    #[must_use]
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
        }
    }

    /// Trigger a shutdown
    pub fn shutdown(&self) {
        info!("Shutdown triggered");
        self.notify.notify_one();
    }

    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&self) {
        self.notify.notified().await;
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, stopping provider"),
        _ = sigint.recv() => info!("Received SIGINT, stopping provider"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, stopping provider");
    Ok(())
}

/// Install signal handlers
///
/// Returns a `ShutdownCoordinator` that is notified when SIGTERM or SIGINT is
/// received. When the handlers cannot be installed the coordinator is never
/// notified and the host closing stdin is the only way to stop.
#[must_use]
pub fn install_signal_handlers() -> ShutdownCoordinator {
    let coordinator = ShutdownCoordinator::new();
    let notifier = coordinator.clone();

    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => notifier.shutdown(),
            Err(e) => warn!(error = %e, "Failed to install signal handlers"),
        }
    });

    coordinator
}
