//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind, accept, global + per-peer limits)
//!     → serve.rs (accept loop, one task per connection, shutdown check)
//!     → connection.rs (connection id, open-connection tracking)
//!     → Hand off to the engine's ConnectionHandler
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Shutdown is checked at the top of every accept iteration
//! - The listener is dropped before draining so the address frees promptly

pub mod connection;
pub mod line;
pub mod listener;
pub mod serve;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use line::{read_line_capped, trim_line_ending};
pub use listener::{Admission, ConnectionLimits, Listener, ListenerError};
pub use serve::{accept_loop, ConnectionContext, ConnectionHandler};
