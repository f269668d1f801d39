//! Remote shell console.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → engine.rs (accept loop, one task per connection)
//!     → session.rs (welcome, prompt, read line)
//!     → command.rs (exact-match parse)
//!     → session.rs (dispatch, CRLF-terminated replies)
//! ```
//!
//! The transport is plaintext; no key exchange or authentication happens
//! before the welcome line.

pub mod command;
pub mod engine;
pub mod session;

pub use command::Command;
pub use engine::ConsoleEngine;
pub use session::{Session, SessionEnd, SessionError, SessionState, HELP_LINES, PROMPT, WELCOME};
