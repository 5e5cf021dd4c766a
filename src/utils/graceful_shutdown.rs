use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use eyre::{Result, WrapErr};
use tokio::{signal, sync::broadcast};

/// Why the proxy is stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT (Ctrl+C)
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Requested from inside the process.
    Requested,
}

/// Fans a single shutdown event out to the server and background tasks.
///
/// The first trigger wins; later ones are ignored. Waiters that subscribe
/// after the event still observe it.
#[derive(Clone)]
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    reason: Arc<OnceLock<ShutdownReason>>,
    drain_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a manager that allows in-flight requests 30 seconds to drain.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(drain_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            reason: Arc::new(OnceLock::new()),
            drain_timeout,
        }
    }

    /// How long in-flight requests may run once shutdown has started.
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason.get().is_some()
    }

    /// The reason of the shutdown in progress, if any.
    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().copied()
    }

    /// Start shutting down. Returns `false` if a shutdown was already under way.
    pub fn trigger_shutdown(&self, reason: ShutdownReason) -> bool {
        if self.reason.set(reason).is_err() {
            tracing::warn!(?reason, "Shutdown already initiated, ignoring signal");
            return false;
        }
        tracing::info!(?reason, "Shutdown initiated");
        // No receiver just means nobody is waiting yet.
        let _ = self.shutdown_tx.send(reason);
        true
    }

    /// Listen for SIGINT and SIGTERM and trigger shutdown on the first one.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for SIGINT")?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Interrupt);
            }
            result = wait_for_sigterm() => {
                result?;
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                self.trigger_shutdown(ShutdownReason::Terminate);
            }
        }
        Ok(())
    }

    /// Resolve once shutdown has been triggered, however long that takes.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        let mut receiver = self.shutdown_tx.subscribe();
        if let Some(reason) = self.reason() {
            return reason;
        }
        match receiver.recv().await {
            Ok(reason) => reason,
            Err(_) => self.reason().unwrap_or(ShutdownReason::Requested),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm =
        signal(SignalKind::terminate()).wrap_err("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // Only Ctrl+C exists here.
    std::future::pending::<()>().await;
    Ok(())
}
