//! Backend selection subsystem.
//!
//! # Data Flow
//! ```text
//! TYPE tag ("ssh")
//!     → BackendKind::from_str (case-insensitive)
//!     → registry.rs (descriptor lookup, factory call)
//!     → adapter.rs (BackendAdapter<Engine>: lifecycle state + engine)
//!     → Arc<dyn ServiceLifecycle>
//! ```
//!
//! # Design Decisions
//! - Explicit tag enum and factory table instead of name-based dispatch
//! - Nothing is instantiated until a tag is resolved
//! - Every adapter claims the one process-wide RunSlot before serving

pub mod adapter;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use crate::config::AddressSpec;

pub use adapter::{BackendAdapter, Engine};
pub use registry::{BackendContext, BackendDescriptor, BackendFactory, BackendRegistry, RegistryError};

/// Type tag of a protocol backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Ftp,
    Http,
    Ssh,
    Smtp,
    Smb,
    Mqtt,
}

impl BackendKind {
    /// Every supported backend, in registration order.
    pub const ALL: [BackendKind; 6] = [
        BackendKind::Ftp,
        BackendKind::Http,
        BackendKind::Ssh,
        BackendKind::Smtp,
        BackendKind::Smb,
        BackendKind::Mqtt,
    ];

    /// Configuration tag, e.g. `ssh`.
    pub fn tag(&self) -> &'static str {
        match self {
            BackendKind::Ftp => "ftp",
            BackendKind::Http => "http",
            BackendKind::Ssh => "ssh",
            BackendKind::Smtp => "smtp",
            BackendKind::Smb => "smb",
            BackendKind::Mqtt => "mqtt",
        }
    }

    /// Display identity returned by `ServiceLifecycle::name`.
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Ftp => "FTP-server",
            BackendKind::Http => "HTTP-server",
            BackendKind::Ssh => "SSH-server",
            BackendKind::Smtp => "SMTP-server",
            BackendKind::Smb => "SMB-server",
            BackendKind::Mqtt => "MQTT-server",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            BackendKind::Ftp => 21,
            BackendKind::Http => 80,
            BackendKind::Ssh => 22,
            BackendKind::Smtp => 587,
            BackendKind::Smb => 445,
            BackendKind::Mqtt => 1883,
        }
    }

    /// Default bind address: all interfaces on the protocol's port.
    pub fn default_address(&self) -> AddressSpec {
        AddressSpec::any(self.default_port())
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for BackendKind {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| RegistryError::UnknownBackendType(s.to_string()))
    }
}
