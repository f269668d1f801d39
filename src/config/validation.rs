//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, known log format)
//! - Check the metrics endpoint address when metrics are enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - The backend type tag is NOT validated here; an unknown tag is a
//!   registry concern and results in no backend starting

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("unknown log format '{0}' (expected 'pretty' or 'json')")]
    LogFormat(String),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),
}

/// Validate a config, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let limits: [(&'static str, usize); 10] = [
        ("http.max_body_bytes", config.http.max_body_bytes),
        ("http.max_connections", config.http.max_connections),
        ("ftp.max_connections", config.ftp.max_connections),
        ("ftp.max_connections_per_ip", config.ftp.max_connections_per_ip),
        ("ssh.max_connections", config.ssh.max_connections),
        ("smtp.max_connections", config.smtp.max_connections),
        ("smtp.max_message_bytes", config.smtp.max_message_bytes),
        ("smb.max_connections", config.smb.max_connections),
        ("mqtt.max_connections", config.mqtt.max_connections),
        ("mqtt.max_packet_bytes", config.mqtt.max_packet_bytes),
    ];
    for (field, value) in limits {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }
    if config.mqtt.outbound_queue == 0 {
        errors.push(ValidationError::Zero {
            field: "mqtt.outbound_queue",
        });
    }
    if config.http.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero {
            field: "http.request_timeout_secs",
        });
    }

    let format = config.observability.log_format.as_str();
    if format != "pretty" && format != "json" {
        errors.push(ValidationError::LogFormat(format.to_string()));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
