//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → CLI flags / env (TYPE, ADDRESS, LOG_LEVEL) overlay
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!
//! ADDRESS
//!     → address.rs (resolve against the selected backend's default)
//!     → AddressSpec handed to ServiceLifecycle::set_address
//! ```
//!
//! # Design Decisions
//! - Config is read once at process start; there is no reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod address;
pub mod loader;
pub mod schema;
pub mod validation;

pub use address::{resolve_address, AddressSpec};
pub use loader::{load_config, ConfigError, ConfigOverrides};
pub use schema::{
    FtpConfig, HttpConfig, LifecycleConfig, MqttConfig, ObservabilityConfig, ServerConfig,
    SmbConfig, SmtpConfig, SshConfig,
};
