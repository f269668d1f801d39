//! MQTT 3.1.1 packet codec (the subset the broker speaks).

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed remaining length")]
    MalformedLength,

    #[error("packet of {0} bytes exceeds limit")]
    PacketTooLarge(usize),

    #[error("unsupported packet type {0}")]
    UnsupportedPacketType(u8),

    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect {
        protocol_level: u8,
        clean_session: bool,
        keep_alive: u16,
        client_id: String,
    },
    Connack {
        session_present: bool,
        code: u8,
    },
    Publish {
        topic: String,
        qos: u8,
        retain: bool,
        packet_id: Option<u16>,
        payload: Vec<u8>,
    },
    Puback {
        packet_id: u16,
    },
    Subscribe {
        packet_id: u16,
        filters: Vec<(String, u8)>,
    },
    Suback {
        packet_id: u16,
        codes: Vec<u8>,
    },
    Unsubscribe {
        packet_id: u16,
        filters: Vec<String>,
    },
    Unsuback {
        packet_id: u16,
    },
    Pingreq,
    Pingresp,
    Disconnect,
}

/// CONNACK return codes.
pub mod connack {
    pub const ACCEPTED: u8 = 0x00;
    pub const UNACCEPTABLE_PROTOCOL: u8 = 0x01;
    pub const IDENTIFIER_REJECTED: u8 = 0x02;
}

/// SUBACK failure code.
pub const SUBACK_FAILURE: u8 = 0x80;

/// Read one packet. `Ok(None)` on EOF before a fixed header.
pub async fn read_packet<R>(reader: &mut R, max_bytes: usize) -> Result<Option<Packet>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let header = match reader.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await?;
        length |= usize::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(CodecError::MalformedLength);
        }
    }

    if length > max_bytes {
        return Err(CodecError::PacketTooLarge(length));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    Packet::decode(header, &body).map(Some)
}

struct Cursor<'a> {
    buf: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Result<u8, CodecError> {
        let (&byte, rest) = self.buf.split_first().ok_or(CodecError::Malformed("truncated"))?;
        self.buf = rest;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes([self.u8()?, self.u8()?]))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        if self.buf.len() < len {
            return Err(CodecError::Malformed("truncated"));
        }
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    fn string(&mut self) -> Result<String, CodecError> {
        let len = usize::from(self.u16()?);
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::Malformed("invalid UTF-8 string"))
    }

    fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Packet {
    pub fn decode(header: u8, body: &[u8]) -> Result<Packet, CodecError> {
        let kind = header >> 4;
        let flags = header & 0x0F;
        let mut cur = Cursor { buf: body };

        let packet = match kind {
            1 => {
                let protocol = cur.string()?;
                if protocol != "MQTT" && protocol != "MQIsdp" {
                    return Err(CodecError::Malformed("unknown protocol name"));
                }
                let protocol_level = cur.u8()?;
                let connect_flags = cur.u8()?;
                let keep_alive = cur.u16()?;
                let client_id = cur.string()?;
                // Will, username and password are read past and ignored.
                if connect_flags & 0x04 != 0 {
                    cur.string()?;
                    let len = usize::from(cur.u16()?);
                    cur.bytes(len)?;
                }
                if connect_flags & 0x80 != 0 {
                    cur.string()?;
                }
                if connect_flags & 0x40 != 0 {
                    let len = usize::from(cur.u16()?);
                    cur.bytes(len)?;
                }
                Packet::Connect {
                    protocol_level,
                    clean_session: connect_flags & 0x02 != 0,
                    keep_alive,
                    client_id,
                }
            }
            2 => {
                let ack_flags = cur.u8()?;
                Packet::Connack {
                    session_present: ack_flags & 0x01 != 0,
                    code: cur.u8()?,
                }
            }
            3 => {
                let qos = (flags >> 1) & 0x03;
                if qos == 3 {
                    return Err(CodecError::Malformed("invalid QoS"));
                }
                let topic = cur.string()?;
                let packet_id = if qos > 0 { Some(cur.u16()?) } else { None };
                Packet::Publish {
                    topic,
                    qos,
                    retain: flags & 0x01 != 0,
                    packet_id,
                    payload: cur.rest().to_vec(),
                }
            }
            4 => Packet::Puback {
                packet_id: cur.u16()?,
            },
            8 => {
                let packet_id = cur.u16()?;
                let mut filters = Vec::new();
                while !cur.is_empty() {
                    let filter = cur.string()?;
                    filters.push((filter, cur.u8()? & 0x03));
                }
                if filters.is_empty() {
                    return Err(CodecError::Malformed("SUBSCRIBE without filters"));
                }
                Packet::Subscribe { packet_id, filters }
            }
            9 => Packet::Suback {
                packet_id: cur.u16()?,
                codes: cur.rest().to_vec(),
            },
            10 => {
                let packet_id = cur.u16()?;
                let mut filters = Vec::new();
                while !cur.is_empty() {
                    filters.push(cur.string()?);
                }
                Packet::Unsubscribe { packet_id, filters }
            }
            11 => Packet::Unsuback {
                packet_id: cur.u16()?,
            },
            12 => Packet::Pingreq,
            13 => Packet::Pingresp,
            14 => Packet::Disconnect,
            other => return Err(CodecError::UnsupportedPacketType(other)),
        };
        Ok(packet)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        let header = match self {
            Packet::Connect {
                protocol_level,
                clean_session,
                keep_alive,
                client_id,
            } => {
                put_string(&mut body, "MQTT");
                body.push(*protocol_level);
                body.push(if *clean_session { 0x02 } else { 0x00 });
                body.extend_from_slice(&keep_alive.to_be_bytes());
                put_string(&mut body, client_id);
                0x10
            }
            Packet::Connack {
                session_present,
                code,
            } => {
                body.push(u8::from(*session_present));
                body.push(*code);
                0x20
            }
            Packet::Publish {
                topic,
                qos,
                retain,
                packet_id,
                payload,
            } => {
                put_string(&mut body, topic);
                if let Some(id) = packet_id {
                    body.extend_from_slice(&id.to_be_bytes());
                }
                body.extend_from_slice(payload);
                0x30 | (qos << 1) | u8::from(*retain)
            }
            Packet::Puback { packet_id } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                0x40
            }
            Packet::Subscribe { packet_id, filters } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                for (filter, qos) in filters {
                    put_string(&mut body, filter);
                    body.push(*qos);
                }
                0x82
            }
            Packet::Suback { packet_id, codes } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                body.extend_from_slice(codes);
                0x90
            }
            Packet::Unsubscribe { packet_id, filters } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                for filter in filters {
                    put_string(&mut body, filter);
                }
                0xA2
            }
            Packet::Unsuback { packet_id } => {
                body.extend_from_slice(&packet_id.to_be_bytes());
                0xB0
            }
            Packet::Pingreq => 0xC0,
            Packet::Pingresp => 0xD0,
            Packet::Disconnect => 0xE0,
        };

        let mut out = Vec::with_capacity(body.len() + 5);
        out.push(header);
        put_remaining_length(&mut out, body.len());
        out.extend_from_slice(&body);
        out
    }
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    let len = u16::try_from(value.len()).unwrap_or(u16::MAX);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&value.as_bytes()[..usize::from(len)]);
}

fn put_remaining_length(buf: &mut Vec<u8>, mut length: usize) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if length == 0 {
            break;
        }
    }
}
