//! Shared accept loop for engines that own a per-connection protocol loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::lifecycle::ShutdownSignal;
use crate::net::connection::{ConnectionId, ConnectionTracker};
use crate::net::listener::{Admission, Listener, ListenerError};
use crate::observability::metrics;

/// Per-connection context handed to a `ConnectionHandler`.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub shutdown: ShutdownSignal,
}

impl ConnectionContext {
    /// Identity used to tag this connection's log lines.
    pub fn identity(&self) -> String {
        format!("{}@{}", self.id, self.peer)
    }
}

/// Protocol logic run on its own task for each admitted connection.
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Serve one connection until it ends. Errors stay inside the handler.
    async fn handle(&self, stream: TcpStream, ctx: ConnectionContext);

    /// Called for connections over the per-peer cap; default drops them.
    async fn refuse(&self, stream: TcpStream, peer: SocketAddr) {
        let _ = (stream, peer);
    }
}

/// Accept connections until shutdown, then release the listener and drain.
pub async fn accept_loop<H: ConnectionHandler>(
    backend: &'static str,
    listener: Listener,
    mut shutdown: ShutdownSignal,
    handler: Arc<H>,
    drain_timeout: Duration,
) {
    let tracker = ConnectionTracker::new(backend);

    loop {
        if shutdown.is_triggered() {
            break;
        }

        let admission = tokio::select! {
            _ = shutdown.recv() => break,
            admission = listener.accept() => admission,
        };

        match admission {
            Ok(Admission::Admitted(accepted)) => {
                metrics::record_connection(backend);
                let guard = tracker.track();
                let ctx = ConnectionContext {
                    id: guard.id(),
                    peer: accepted.peer,
                    shutdown: shutdown.clone(),
                };
                tracing::debug!(backend, connection = %ctx.id, peer = %ctx.peer, "Session started");

                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let _permit = accepted.permit;
                    let _guard = guard;
                    handler.handle(accepted.stream, ctx).await;
                });
            }
            Ok(Admission::Refused { stream, peer }) => {
                metrics::record_refused(backend);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move { handler.refuse(stream, peer).await });
            }
            Err(ListenerError::Closed) => break,
            Err(e) => {
                tracing::warn!(backend, error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    // Release the address before waiting on open sessions.
    drop(listener);

    let open = tracker.active_count();
    if open > 0 {
        tracing::info!(backend, open, "Waiting for sessions to close");
        let remaining = tracker.wait_for_drain(drain_timeout).await;
        if remaining > 0 {
            tracing::warn!(backend, remaining, "Drain timeout elapsed, abandoning sessions");
        }
    }
}
