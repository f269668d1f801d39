//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration for a server process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Backend type tag (ftp, http, ssh, smtp, smb, mqtt).
    #[serde(rename = "type")]
    pub server_type: String,

    /// Raw address override ("host:port" or "host").
    pub address: Option<String>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Start/stop behaviour shared by every backend.
    pub lifecycle: LifecycleConfig,

    pub http: HttpConfig,
    pub ftp: FtpConfig,
    pub ssh: SshConfig,
    pub smtp: SmtpConfig,
    pub smb: SmbConfig,
    pub mqtt: MqttConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_type: "http".to_string(),
            address: None,
            observability: ObservabilityConfig::default(),
            lifecycle: LifecycleConfig::default(),
            http: HttpConfig::default(),
            ftp: FtpConfig::default(),
            ssh: SshConfig::default(),
            smtp: SmtpConfig::default(),
            smb: SmbConfig::default(),
            mqtt: MqttConfig::default(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format ("pretty" or "json").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Seconds a stopping backend waits for open sessions to close.
    pub drain_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 5,
        }
    }
}

/// Web backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Document root served for GET/HEAD.
    pub root: PathBuf,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,

    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./http-files"),
            request_timeout_secs: 30,
            max_body_bytes: 2 * 1024 * 1024,
            max_connections: 1024,
        }
    }
}

/// File transfer backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FtpConfig {
    /// Directory the virtual filesystem is confined to.
    pub root: PathBuf,

    /// Text sent after the 220 greeting code.
    pub banner: String,

    /// Maximum concurrent control connections.
    pub max_connections: usize,

    /// Maximum concurrent control connections from one IP.
    pub max_connections_per_ip: usize,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./ftp-files"),
            banner: "FTP-server is ready.".to_string(),
            max_connections: 256,
            max_connections_per_ip: 5,
        }
    }
}

/// Remote shell backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SshConfig {
    /// Maximum concurrent console sessions.
    pub max_connections: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
        }
    }
}

/// Mail relay backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    /// Hostname announced in the greeting and HELO/EHLO replies.
    pub hostname: String,

    /// Maximum accepted message size in bytes.
    pub max_message_bytes: usize,

    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            max_message_bytes: 32 * 1024 * 1024,
            max_connections: 64,
        }
    }
}

/// File sharing backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmbConfig {
    /// Share name (announced upper-case).
    pub share_name: String,

    /// Directory backing the share.
    pub share_path: PathBuf,

    /// Share comment.
    pub share_comment: String,

    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for SmbConfig {
    fn default() -> Self {
        Self {
            share_name: "smbserver".to_string(),
            share_path: PathBuf::from("./smb-share"),
            share_comment: "SMB Server Share".to_string(),
            max_connections: 64,
        }
    }
}

/// Message broker backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Maximum concurrent client connections.
    pub max_connections: usize,

    /// Largest packet accepted from a client, in bytes.
    pub max_packet_bytes: usize,

    /// Packets buffered per client before deliveries are dropped.
    pub outbound_queue: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            max_packet_bytes: 256 * 1024,
            outbound_queue: 64,
        }
    }
}
