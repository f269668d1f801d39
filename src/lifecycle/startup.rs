//! Startup orchestration.
//!
//! # Responsibilities
//! - Select the backend for the configured type tag
//! - Resolve and apply the address override
//! - Start background tasks (metrics exporter, signal watcher)
//! - Run the backend until it is stopped
//!
//! # Design Decisions
//! - Unknown type tag: logged, process does no work, exits cleanly
//! - Malformed address: fatal, never silently replaced by the default
//! - Bind failure: fatal, surfaced to the caller
//! - A second signal during the drain returns without waiting for sessions

use std::future::Future;
use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::backend::BackendRegistry;
use crate::config::{resolve_address, ConfigError, ServerConfig};
use crate::lifecycle::service::{ServiceError, ServiceLifecycle};
use crate::lifecycle::signals;
use crate::observability::metrics::{self, MetricsError};

/// Fatal startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Select, configure and run the backend described by `config`.
///
/// Returns once the backend has stopped, or immediately when the type tag
/// names no registered backend.
pub async fn run(config: ServerConfig) -> Result<(), StartupError> {
    let config = Arc::new(config);
    let registry = BackendRegistry::builtin(Arc::clone(&config));

    let backend = match registry.resolve(&config.server_type) {
        Ok(backend) => backend,
        Err(err) => {
            tracing::warn!(error = %err, "No backend selected, nothing to serve");
            return Ok(());
        }
    };

    let address = resolve_address(config.address.as_deref(), &backend.address())?;
    backend.set_address(address)?;

    tracing::info!(
        backend = backend.name(),
        address = %backend.address(),
        "Backend selected"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(&config.observability.metrics_address)?;
    }

    let (force_tx, force_rx) = oneshot::channel();
    let watcher = tokio::spawn(watch_signals(
        Arc::clone(&backend),
        signals::wait_for_signal,
        force_tx,
    ));

    let result = tokio::select! {
        result = backend.start() => result,
        Ok(signal) = force_rx => {
            tracing::warn!(signal, "Second signal received, abandoning open sessions");
            Ok(())
        }
    };
    watcher.abort();

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

/// First signal stops the backend gracefully; the second one is sent on
/// `force` so the caller can stop waiting for the drain.
async fn watch_signals<F, Fut>(
    backend: Arc<dyn ServiceLifecycle>,
    mut next_signal: F,
    force: oneshot::Sender<&'static str>,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<&'static str>>,
{
    match next_signal().await {
        Ok(signal) => {
            tracing::info!(signal, backend = backend.name(), "Shutdown signal received");
            backend.stop();
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return;
        }
    }

    match next_signal().await {
        Ok(signal) => {
            let _ = force.send(signal);
        }
        Err(e) => tracing::error!(error = %e, "Failed to install signal handlers"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use tokio::sync::mpsc;

    fn idle_backend() -> Arc<dyn ServiceLifecycle> {
        BackendRegistry::builtin(Arc::new(ServerConfig::default()))
            .resolve("ssh")
            .unwrap()
    }

    #[tokio::test]
    async fn second_signal_forces_exit() {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let signal_rx = Arc::new(tokio::sync::Mutex::new(signal_rx));
        let next_signal = move || {
            let rx = Arc::clone(&signal_rx);
            async move {
                rx.lock()
                    .await
                    .recv()
                    .await
                    .ok_or_else(|| io::Error::other("closed"))
            }
        };

        let backend = idle_backend();
        let (force_tx, mut force_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_signals(Arc::clone(&backend), next_signal, force_tx));

        signal_tx.send("SIGINT").unwrap();
        tokio::task::yield_now().await;
        assert!(force_rx.try_recv().is_err());
        assert_eq!(backend.state(), LifecycleState::Idle);

        signal_tx.send("SIGTERM").unwrap();
        watcher.await.unwrap();
        assert_eq!(force_rx.await.unwrap(), "SIGTERM");
    }

    #[tokio::test]
    async fn handler_failure_never_forces() {
        let backend = idle_backend();
        let (force_tx, force_rx) = oneshot::channel();

        watch_signals(backend, || async { Err(io::Error::other("no handlers")) }, force_tx).await;

        assert!(force_rx.await.is_err());
    }
}
