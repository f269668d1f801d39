//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → Registry selects backend → Resolve address → set_address → start()
//!
//! Shutdown (shutdown.rs, state.rs):
//!     stop() → Running→Stopped (atomic) → trigger watch → accept loop exits
//!            → listener dropped (address released) → drain sessions → start() returns
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → stop() on the selected backend
//! ```
//!
//! # Design Decisions
//! - One shared state cell per backend; no locks between start and stop
//! - stop() never waits for start(); it only flips state and signals
//! - Shutdown has timeout: open sessions are abandoned after the drain deadline

pub mod service;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use service::{ServiceError, ServiceLifecycle};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use state::{LifecycleCell, LifecycleState, RunSlot, RunSlotGuard};
