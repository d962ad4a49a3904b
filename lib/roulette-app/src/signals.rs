//! Shutdown signal handling.

use tokio::{
    select,
    signal::unix::{signal, SignalKind},
    sync::mpsc,
};
use tracing::{error, info};

use crate::error::{ErrorContext as _, GenericError};

/// Completes once the process has been asked to shut down.
pub struct ShutdownSignal {
    rx: mpsc::Receiver<()>,
}

impl ShutdownSignal {
    /// Creates a `ShutdownSignal` fired by sending on (or dropping) the returned sender.
    pub fn manual() -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel(1);
        (tx, Self { rx })
    }

    /// Waits for the shutdown signal.
    ///
    /// Also completes if every sender has been dropped.
    pub async fn wait(mut self) {
        self.rx.recv().await.unwrap_or(())
    }
}

/// Installs handlers for SIGINT and SIGTERM, returning a signal that fires when either is received.
///
/// # Errors
///
/// If either handler cannot be installed, an error is returned.
pub fn spawn_signal_handlers() -> Result<ShutdownSignal, GenericError> {
    let mut sigint_handler = signal(SignalKind::interrupt()).error_context("Failed to set up SIGINT handler.")?;
    let mut sigterm_handler = signal(SignalKind::terminate()).error_context("Failed to set up SIGTERM handler.")?;

    let (shutdown_tx, shutdown) = ShutdownSignal::manual();
    tokio::spawn(async move {
        select! {
            _ = sigint_handler.recv() => {
                info!("Received SIGINT, shutting down...");
            }
            _ = sigterm_handler.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        if let Err(e) = shutdown_tx.send(()).await {
            error!("Failed to send shutdown signal: {:?}", e);
        }
    });

    Ok(shutdown)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn manual_signal() {
        let (tx, shutdown) = ShutdownSignal::manual();
        tx.send(()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_sender_completes() {
        let (tx, shutdown) = ShutdownSignal::manual();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
    }
}
