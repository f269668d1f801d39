//! Simple test server library: one protocol backend per process behind a
//! uniform start/stop lifecycle.

// Selection and lifecycle
pub mod backend;
pub mod config;
pub mod lifecycle;

// Transport and protocols
pub mod console;
pub mod net;
pub mod protocol;

// Cross-cutting concerns
pub mod observability;

pub use backend::{BackendKind, BackendRegistry};
pub use config::{AddressSpec, ServerConfig};
pub use lifecycle::{LifecycleState, ServiceError, ServiceLifecycle, Shutdown};
