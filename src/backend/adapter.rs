//! Generic lifecycle shim around a protocol engine.
//!
//! # Responsibilities
//! - Hold the backend's lifecycle state, address and shutdown coordinator
//! - Translate start/stop into engine prepare/bind/serve/shutdown
//! - Enforce the single-running-backend invariant through the RunSlot
//!
//! # Design Decisions
//! - The engine never sees lifecycle state; it only gets a bound listener
//!   and a shutdown signal
//! - Bind and prepare failures leave the backend Stopped

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;

use crate::backend::registry::BackendContext;
use crate::backend::BackendKind;
use crate::config::AddressSpec;
use crate::lifecycle::{
    LifecycleCell, LifecycleState, RunSlot, ServiceError, ServiceLifecycle, Shutdown, ShutdownSignal,
};
use crate::net::{ConnectionLimits, Listener};

/// A protocol engine driven by a `BackendAdapter`.
#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Backend this engine implements.
    fn kind(&self) -> BackendKind;

    /// Connection limits for the listener.
    fn limits(&self) -> ConnectionLimits;

    /// Fixed setup before binding (directories, shares).
    async fn prepare(&self) -> io::Result<()> {
        Ok(())
    }

    /// Serve connections from `listener` until `shutdown` fires.
    ///
    /// `bound` is the configured host with the port actually bound.
    async fn serve(
        &self,
        listener: Listener,
        bound: AddressSpec,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServiceError>;
}

/// Lifecycle-conformant backend wrapping exactly one engine.
pub struct BackendAdapter<E: Engine> {
    engine: E,
    state: LifecycleCell,
    address: ArcSwap<AddressSpec>,
    bound: ArcSwapOption<SocketAddr>,
    shutdown: Shutdown,
    run_slot: RunSlot,
}

impl<E: Engine> BackendAdapter<E> {
    pub fn new(engine: E, ctx: &BackendContext) -> Self {
        let address = engine.kind().default_address();
        Self {
            engine,
            state: LifecycleCell::new(),
            address: ArcSwap::from_pointee(address),
            bound: ArcSwapOption::empty(),
            shutdown: Shutdown::new(),
            run_slot: ctx.run_slot,
        }
    }
}

#[async_trait]
impl<E: Engine> ServiceLifecycle for BackendAdapter<E> {
    fn name(&self) -> &'static str {
        self.engine.kind().display_name()
    }

    fn kind(&self) -> BackendKind {
        self.engine.kind()
    }

    fn address(&self) -> AddressSpec {
        AddressSpec::clone(&self.address.load())
    }

    fn state(&self) -> LifecycleState {
        self.state.get()
    }

    fn bound_address(&self) -> Option<SocketAddr> {
        self.bound.load().as_deref().copied()
    }

    fn set_address(&self, address: AddressSpec) -> Result<(), ServiceError> {
        match self.state.get() {
            LifecycleState::Idle => {
                self.address.store(Arc::new(address));
                Ok(())
            }
            state => Err(ServiceError::AddressFrozen(state)),
        }
    }

    async fn start(&self) -> Result<(), ServiceError> {
        let name = self.name();

        let state = self.state.get();
        if state != LifecycleState::Idle {
            tracing::warn!(backend = name, %state, "start() ignored");
            return Ok(());
        }

        let _slot = self
            .run_slot
            .try_claim()
            .ok_or(ServiceError::AnotherBackendRunning)?;

        if let Err(state) = self.state.begin() {
            tracing::warn!(backend = name, %state, "start() ignored");
            return Ok(());
        }

        if let Err(e) = self.engine.prepare().await {
            self.state.stop();
            tracing::error!(backend = name, error = %e, "Backend preparation failed");
            return Err(ServiceError::Prepare(e));
        }

        let address = self.address();
        let listener = match Listener::bind(&address, self.engine.limits()).await {
            Ok(listener) => listener,
            Err(e) => {
                self.state.stop();
                tracing::error!(backend = name, address = %address, error = %e, "Bind failed");
                return Err(ServiceError::Bind {
                    address,
                    source: e.into(),
                });
            }
        };

        let local = listener.local_addr().ok();
        self.bound.store(local.map(Arc::new));
        let bound = AddressSpec::new(
            address.host.clone(),
            local.map_or(address.port, |addr| addr.port()),
        );

        tracing::info!(backend = name, address = %bound, "{} is ready and serving on {}.", name, bound);

        let result = self
            .engine
            .serve(listener, bound, self.shutdown.subscribe())
            .await;

        // Serve can also end on its own (transport error); make sure sessions see it.
        self.state.stop();
        self.shutdown.trigger();
        self.bound.store(None);

        tracing::info!(backend = name, "{} stopped...", name);
        result
    }

    fn stop(&self) {
        if self.state.stop() {
            tracing::info!(backend = self.name(), "Stopping");
            self.shutdown.trigger();
        } else {
            tracing::debug!(backend = self.name(), state = %self.state.get(), "stop() ignored");
        }
    }
}
