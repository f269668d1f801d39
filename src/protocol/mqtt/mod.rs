//! Anonymous MQTT broker.
//!
//! # Data Flow
//! ```text
//! Client socket
//!     → codec.rs (read_packet)
//!     → session loop (CONNECT handshake, keep-alive deadline)
//!     → Broker (subscription table, fan-out by topic.rs matching)
//!     → per-client mpsc queue → writer task → client socket
//! ```
//!
//! # Design Decisions
//! - Deliveries are QoS 0; a full client queue drops the delivery
//! - Nothing is retained and no session outlives its connection

pub mod codec;
pub mod topic;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::{BackendKind, Engine};
use crate::config::{AddressSpec, ServerConfig};
use crate::lifecycle::{ServiceError, ShutdownSignal};
use crate::net::{accept_loop, ConnectionContext, ConnectionHandler, ConnectionLimits, Listener};
use crate::observability::metrics;

pub use codec::{connack, read_packet, CodecError, Packet, SUBACK_FAILURE};
pub use topic::{topic_matches, valid_filter, valid_topic_name};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct Client {
    client_id: String,
    filters: HashSet<String>,
    tx: mpsc::Sender<Packet>,
}

/// Subscription table shared by every connection of one backend.
#[derive(Default)]
pub struct Broker {
    clients: DashMap<u64, Client>,
}

impl Broker {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, id: u64, client_id: String, tx: mpsc::Sender<Packet>) {
        self.clients.insert(
            id,
            Client {
                client_id,
                filters: HashSet::new(),
                tx,
            },
        );
    }

    fn remove(&self, id: u64) {
        self.clients.remove(&id);
    }

    /// Add filters for a client; returns one SUBACK code per filter.
    pub fn subscribe(&self, id: u64, filters: &[(String, u8)]) -> Vec<u8> {
        let Some(mut client) = self.clients.get_mut(&id) else {
            return vec![SUBACK_FAILURE; filters.len()];
        };
        filters
            .iter()
            .map(|(filter, _)| {
                if valid_filter(filter) {
                    client.filters.insert(filter.clone());
                    0x00
                } else {
                    SUBACK_FAILURE
                }
            })
            .collect()
    }

    pub fn unsubscribe(&self, id: u64, filters: &[String]) {
        if let Some(mut client) = self.clients.get_mut(&id) {
            for filter in filters {
                client.filters.remove(filter);
            }
        }
    }

    /// Deliver to every matching subscriber at QoS 0. Returns deliveries queued.
    pub fn publish(&self, topic: &str, payload: &[u8]) -> usize {
        let mut delivered = 0;
        for client in self.clients.iter() {
            if !client.filters.iter().any(|filter| topic_matches(filter, topic)) {
                continue;
            }
            let packet = Packet::Publish {
                topic: topic.to_string(),
                qos: 0,
                retain: false,
                packet_id: None,
                payload: payload.to_vec(),
            };
            match client.tx.try_send(packet) {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!(client_id = %client.client_id, error = %e, "Delivery dropped"),
            }
        }
        delivered
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

pub struct MqttEngine {
    max_connections: usize,
    max_packet_bytes: usize,
    outbound_queue: usize,
    drain_timeout: Duration,
}

impl MqttEngine {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            max_connections: config.mqtt.max_connections,
            max_packet_bytes: config.mqtt.max_packet_bytes,
            outbound_queue: config.mqtt.outbound_queue,
            drain_timeout: Duration::from_secs(config.lifecycle.drain_timeout_secs),
        }
    }
}

#[async_trait]
impl Engine for MqttEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Mqtt
    }

    fn limits(&self) -> ConnectionLimits {
        ConnectionLimits::new(self.max_connections)
    }

    async fn serve(
        &self,
        listener: Listener,
        _bound: AddressSpec,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServiceError> {
        let handler = Arc::new(MqttHandler {
            broker: Arc::new(Broker::new()),
            max_packet_bytes: self.max_packet_bytes,
            outbound_queue: self.outbound_queue,
        });
        accept_loop(
            self.kind().display_name(),
            listener,
            shutdown,
            handler,
            self.drain_timeout,
        )
        .await;
        Ok(())
    }
}

struct MqttHandler {
    broker: Arc<Broker>,
    max_packet_bytes: usize,
    outbound_queue: usize,
}

/// Why a client session ended.
#[derive(Debug)]
enum Exit {
    Disconnect,
    Eof,
    KeepAliveExpired,
    Shutdown,
    Violation(&'static str),
}

impl MqttHandler {
    async fn session(&self, stream: TcpStream, ctx: &ConnectionContext) -> Result<Exit, CodecError> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);

        let first = tokio::time::timeout(CONNECT_TIMEOUT, read_packet(&mut reader, self.max_packet_bytes))
            .await
            .map_err(|_| CodecError::Malformed("no CONNECT before timeout"))??;

        let Some(Packet::Connect {
            protocol_level,
            clean_session,
            keep_alive,
            client_id,
        }) = first
        else {
            return Ok(Exit::Violation("first packet was not CONNECT"));
        };

        let refusal = if protocol_level != 3 && protocol_level != 4 {
            Some(connack::UNACCEPTABLE_PROTOCOL)
        } else if client_id.is_empty() && !clean_session {
            Some(connack::IDENTIFIER_REJECTED)
        } else {
            None
        };
        if let Some(code) = refusal {
            let reply = Packet::Connack {
                session_present: false,
                code,
            };
            write.write_all(&reply.encode()).await?;
            return Ok(Exit::Violation("CONNECT refused"));
        }

        let client_id = if client_id.is_empty() {
            format!("auto-{}", Uuid::new_v4())
        } else {
            client_id
        };

        let (tx, mut rx) = mpsc::channel::<Packet>(self.outbound_queue);
        let id = ctx.id.as_u64();
        self.broker.register(id, client_id.clone(), tx.clone());
        tracing::info!(connection = %ctx.identity(), %client_id, keep_alive, "MQTT client connected");

        let writer = tokio::spawn(async move {
            while let Some(packet) = rx.recv().await {
                if write.write_all(&packet.encode()).await.is_err() {
                    break;
                }
            }
        });

        let _ = tx
            .send(Packet::Connack {
                session_present: false,
                code: connack::ACCEPTED,
            })
            .await;

        let result = self.serve_client(id, &mut reader, &tx, keep_alive, ctx).await;

        self.broker.remove(id);
        drop(tx);
        let _ = writer.await;
        tracing::info!(connection = %ctx.identity(), %client_id, "MQTT client disconnected");
        result
    }

    async fn serve_client(
        &self,
        id: u64,
        reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
        tx: &mpsc::Sender<Packet>,
        keep_alive: u16,
        ctx: &ConnectionContext,
    ) -> Result<Exit, CodecError> {
        let mut shutdown = ctx.shutdown.clone();
        // Keep-alive of 0 disables the deadline.
        let deadline = (keep_alive > 0).then(|| Duration::from_millis(u64::from(keep_alive) * 1500));

        loop {
            let next = async {
                match deadline {
                    Some(limit) => tokio::time::timeout(limit, read_packet(&mut *reader, self.max_packet_bytes))
                        .await
                        .ok(),
                    None => Some(read_packet(&mut *reader, self.max_packet_bytes).await),
                }
            };

            let packet = tokio::select! {
                _ = shutdown.recv() => return Ok(Exit::Shutdown),
                packet = next => match packet {
                    None => return Ok(Exit::KeepAliveExpired),
                    Some(result) => match result? {
                        None => return Ok(Exit::Eof),
                        Some(packet) => packet,
                    },
                },
            };

            match packet {
                Packet::Publish {
                    topic,
                    qos,
                    packet_id,
                    payload,
                    ..
                } => {
                    if !valid_topic_name(&topic) {
                        return Ok(Exit::Violation("invalid topic name"));
                    }
                    if qos == 2 {
                        return Ok(Exit::Violation("QoS 2 is not supported"));
                    }
                    metrics::record_mqtt_publish();
                    let delivered = self.broker.publish(&topic, &payload);
                    tracing::debug!(connection = %ctx.identity(), %topic, bytes = payload.len(), delivered, "PUBLISH");
                    if let (1, Some(packet_id)) = (qos, packet_id) {
                        let _ = tx.send(Packet::Puback { packet_id }).await;
                    }
                }
                Packet::Subscribe { packet_id, filters } => {
                    let codes = self.broker.subscribe(id, &filters);
                    tracing::debug!(connection = %ctx.identity(), ?filters, "SUBSCRIBE");
                    let _ = tx.send(Packet::Suback { packet_id, codes }).await;
                }
                Packet::Unsubscribe { packet_id, filters } => {
                    self.broker.unsubscribe(id, &filters);
                    let _ = tx.send(Packet::Unsuback { packet_id }).await;
                }
                Packet::Pingreq => {
                    let _ = tx.send(Packet::Pingresp).await;
                }
                Packet::Disconnect => return Ok(Exit::Disconnect),
                Packet::Connect { .. } => return Ok(Exit::Violation("second CONNECT")),
                _ => {}
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for MqttHandler {
    async fn handle(&self, stream: TcpStream, ctx: ConnectionContext) {
        match self.session(stream, &ctx).await {
            Ok(Exit::Violation(reason)) => {
                tracing::info!(connection = %ctx.identity(), reason, "MQTT connection closed")
            }
            Ok(exit) => tracing::debug!(connection = %ctx.identity(), ?exit, "MQTT session ended"),
            Err(e) => tracing::debug!(connection = %ctx.identity(), error = %e, "MQTT session failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_reaches_matching_subscribers() {
        let broker = Broker::new();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        broker.register(1, "one".into(), tx1);
        broker.register(2, "two".into(), tx2);

        assert_eq!(broker.subscribe(1, &[("sensors/+".into(), 1)]), vec![0]);
        assert_eq!(broker.subscribe(2, &[("other/#".into(), 0)]), vec![0]);

        assert_eq!(broker.publish("sensors/kitchen", b"21"), 1);
        match rx1.recv().await.unwrap() {
            Packet::Publish { topic, qos, payload, .. } => {
                assert_eq!(topic, "sensors/kitchen");
                assert_eq!(qos, 0);
                assert_eq!(payload, b"21");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn invalid_filters_are_refused() {
        let broker = Broker::new();
        let (tx, _rx) = mpsc::channel(1);
        broker.register(7, "c".into(), tx);
        let codes = broker.subscribe(7, &[("a/#/b".into(), 0), ("a/b".into(), 0)]);
        assert_eq!(codes, vec![SUBACK_FAILURE, 0]);
    }

    #[test]
    fn unsubscribe_and_remove_stop_deliveries() {
        let broker = Broker::new();
        let (tx, _rx) = mpsc::channel(4);
        broker.register(3, "c".into(), tx);
        broker.subscribe(3, &[("t".into(), 0)]);
        assert_eq!(broker.publish("t", b"x"), 1);

        broker.unsubscribe(3, &["t".into()]);
        assert_eq!(broker.publish("t", b"x"), 0);

        broker.remove(3);
        assert_eq!(broker.client_count(), 0);
    }

    #[test]
    fn full_queue_drops_delivery() {
        let broker = Broker::new();
        let (tx, _rx) = mpsc::channel(1);
        broker.register(4, "slow".into(), tx);
        broker.subscribe(4, &[("#".into(), 0)]);
        assert_eq!(broker.publish("a", b"1"), 1);
        assert_eq!(broker.publish("a", b"2"), 0);
    }
}
