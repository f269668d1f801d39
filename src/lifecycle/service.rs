//! The lifecycle contract every backend implements.

use std::net::SocketAddr;

use async_trait::async_trait;
use thiserror::Error;

use crate::backend::BackendKind;
use crate::config::AddressSpec;
use crate::lifecycle::state::LifecycleState;

/// Errors surfaced by `ServiceLifecycle` operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The backend could not acquire its network resource. Fatal.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: AddressSpec,
        #[source]
        source: std::io::Error,
    },

    /// `set_address` called once the backend left `Idle`.
    #[error("address is frozen while the backend is {0}")]
    AddressFrozen(LifecycleState),

    /// Another backend from the same registry is already serving.
    #[error("another backend is already running in this process")]
    AnotherBackendRunning,

    /// Backend-specific setup (directories, shares) failed before binding.
    #[error("failed to prepare backend: {0}")]
    Prepare(#[source] std::io::Error),

    /// The engine hit an unrecoverable transport error while serving.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Uniform start/stop/address contract across protocol backends.
///
/// `start` runs on one task and `stop` may be called from any other; the
/// two never wait on each other.
#[async_trait]
pub trait ServiceLifecycle: Send + Sync {
    /// Display identity, e.g. `SSH-server`.
    fn name(&self) -> &'static str;

    /// Type tag this backend was registered under.
    fn kind(&self) -> BackendKind;

    /// Currently configured address.
    fn address(&self) -> AddressSpec;

    /// Current lifecycle state.
    fn state(&self) -> LifecycleState;

    /// Socket address actually bound, while serving.
    fn bound_address(&self) -> Option<SocketAddr>;

    /// Overwrite the address. Only allowed while `Idle`.
    fn set_address(&self, address: AddressSpec) -> Result<(), ServiceError>;

    /// Bind and serve until `stop()` or an unrecoverable transport error.
    async fn start(&self) -> Result<(), ServiceError>;

    /// Request shutdown. Idempotent and safe before `start()`.
    fn stop(&self);
}
