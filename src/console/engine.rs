use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::backend::{BackendKind, Engine};
use crate::config::{AddressSpec, ServerConfig};
use crate::console::session::Session;
use crate::lifecycle::{ServiceError, ShutdownSignal};
use crate::net::{accept_loop, ConnectionContext, ConnectionHandler, ConnectionLimits, Listener};

/// Remote shell backend: one line-oriented console session per connection.
pub struct ConsoleEngine {
    max_connections: usize,
    drain_timeout: Duration,
}

impl ConsoleEngine {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            max_connections: config.ssh.max_connections,
            drain_timeout: Duration::from_secs(config.lifecycle.drain_timeout_secs),
        }
    }
}

#[async_trait]
impl Engine for ConsoleEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Ssh
    }

    fn limits(&self) -> ConnectionLimits {
        ConnectionLimits::new(self.max_connections)
    }

    async fn serve(
        &self,
        listener: Listener,
        bound: AddressSpec,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServiceError> {
        let handler = Arc::new(ConsoleHandler {
            address: Arc::new(bound),
        });
        accept_loop(
            self.kind().display_name(),
            listener,
            shutdown,
            handler,
            self.drain_timeout,
        )
        .await;
        Ok(())
    }
}

struct ConsoleHandler {
    address: Arc<AddressSpec>,
}

#[async_trait]
impl ConnectionHandler for ConsoleHandler {
    async fn handle(&self, stream: TcpStream, ctx: ConnectionContext) {
        let identity = ctx.identity();
        let (read, write) = stream.into_split();
        let mut session = Session::new(identity.clone(), Arc::clone(&self.address));

        match session.run(BufReader::new(read), write, ctx.shutdown).await {
            Ok(end) => tracing::debug!(connection = %identity, ?end, "Console session closed"),
            Err(e) => tracing::warn!(connection = %identity, error = %e, "Console session failed"),
        }
    }
}
