//! Configuration loading from disk and process overrides.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading and address resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Malformed address '{raw}': expected 'host:port' or 'host'")]
    MalformedAddress { raw: String },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Values that take precedence over the config file (CLI flags / env).
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server_type: Option<String>,
    pub address: Option<String>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// Overlay the set values onto a config.
    pub fn apply(self, config: &mut ServerConfig) {
        if let Some(server_type) = self.server_type {
            config.server_type = server_type;
        }
        if let Some(address) = self.address {
            config.address = Some(address);
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
    }
}

/// Parse a TOML document into a config without validating it.
pub fn parse_config(content: &str) -> Result<ServerConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Load configuration from an optional TOML file, apply overrides, validate.
pub fn load_config(
    path: Option<&Path>,
    overrides: ConfigOverrides,
) -> Result<ServerConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => ServerConfig::default(),
    };

    overrides.apply(&mut config);
    config.server_type = config.server_type.trim().to_lowercase();

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
