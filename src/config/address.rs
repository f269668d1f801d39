//! Bind addresses and the `ADDRESS` override resolver.
//!
//! # Accepted shapes
//! ```text
//! (absent) | ""      → backend default, unchanged
//! "host:port"        → both overridden (port must be all digits, 0..=65535)
//! "host"             → host overridden, default port kept
//! anything else      → ConfigError::MalformedAddress
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// A resolved (host, port) pair a backend binds to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AddressSpec {
    pub host: String,
    pub port: u16,
}

impl AddressSpec {
    /// Create a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Wildcard address on the given port.
    pub fn any(port: u16) -> Self {
        Self::new("0.0.0.0", port)
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Resolve a raw address override against a backend default.
pub fn resolve_address(
    raw: Option<&str>,
    default: &AddressSpec,
) -> Result<AddressSpec, ConfigError> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(default.clone()),
        Some(raw) => raw,
    };

    let malformed = || ConfigError::MalformedAddress {
        raw: raw.to_string(),
    };

    let tokens: Vec<&str> = raw.split(':').collect();
    match tokens.as_slice() {
        [host, port] if !host.is_empty() && is_digits(port) => {
            let port = port.parse::<u16>().map_err(|_| malformed())?;
            Ok(AddressSpec::new(*host, port))
        }
        [host] if !is_digits(host) => Ok(AddressSpec::new(*host, default.port)),
        _ => Err(malformed()),
    }
}

fn is_digits(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_spec() -> AddressSpec {
        AddressSpec::any(80)
    }

    #[test]
    fn absent_or_empty_keeps_default() {
        assert_eq!(resolve_address(None, &default_spec()).unwrap(), default_spec());
        assert_eq!(resolve_address(Some(""), &default_spec()).unwrap(), default_spec());
        assert_eq!(resolve_address(Some("  "), &default_spec()).unwrap(), default_spec());
    }

    #[test]
    fn host_and_port_override() {
        let spec = resolve_address(Some("host:1234"), &default_spec()).unwrap();
        assert_eq!(spec, AddressSpec::new("host", 1234));
    }

    #[test]
    fn host_only_keeps_default_port() {
        let spec = resolve_address(Some("host"), &default_spec()).unwrap();
        assert_eq!(spec, AddressSpec::new("host", 80));
    }

    #[test]
    fn malformed_shapes_rejected() {
        for raw in ["host:abc", "host:", ":80", "1234", "a:b:c", "host:70000", "::1"] {
            let err = resolve_address(Some(raw), &default_spec()).unwrap_err();
            assert!(
                matches!(err, ConfigError::MalformedAddress { .. }),
                "{raw} should be malformed"
            );
        }
    }

    #[test]
    fn display_joins_host_and_port() {
        assert_eq!(AddressSpec::new("127.0.0.1", 2222).to_string(), "127.0.0.1:2222");
    }
}
