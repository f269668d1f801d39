//! Metrics collection and exposition.
//!
//! # Metrics
//! - `server_connections_total` (counter): admitted connections by backend
//! - `server_refused_connections_total` (counter): connections over the per-peer cap
//! - `server_active_connections` (gauge): open connections by backend
//! - `console_commands_total` (counter): console commands by command
//! - `smtp_messages_total` (counter): messages accepted by the mail relay
//! - `mqtt_publishes_total` (counter): PUBLISH packets received by the broker
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - The Prometheus exporter is optional and off by default

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use thiserror::Error;

/// Errors raised while installing the exporter.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("invalid metrics address '{0}'")]
    Address(String),

    #[error("failed to install Prometheus exporter: {0}")]
    Install(#[from] metrics_exporter_prometheus::BuildError),
}

/// Install the Prometheus exporter with an HTTP scrape listener.
pub fn init_metrics(address: &str) -> Result<(), MetricsError> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|_| MetricsError::Address(address.to_string()))?;

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_connection(backend: &'static str) {
    counter!("server_connections_total", "backend" => backend).increment(1);
}

pub fn record_refused(backend: &'static str) {
    counter!("server_refused_connections_total", "backend" => backend).increment(1);
}

pub fn record_active_connections(backend: &'static str, active: u64) {
    gauge!("server_active_connections", "backend" => backend).set(active as f64);
}

pub fn record_console_command(command: &'static str) {
    counter!("console_commands_total", "command" => command).increment(1);
}

pub fn record_smtp_message() {
    counter!("smtp_messages_total").increment(1);
}

pub fn record_mqtt_publish() {
    counter!("mqtt_publishes_total").increment(1);
}
