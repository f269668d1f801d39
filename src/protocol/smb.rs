//! File sharing capture listener.
//!
//! Answers NetBIOS session requests, reads the first SMB frame, logs what
//! dialect and command the client opened with, then closes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::backend::{BackendKind, Engine};
use crate::config::{AddressSpec, ServerConfig};
use crate::lifecycle::{ServiceError, ShutdownSignal};
use crate::net::{accept_loop, ConnectionContext, ConnectionHandler, ConnectionLimits, Listener};

const SESSION_MESSAGE: u8 = 0x00;
const SESSION_REQUEST: u8 = 0x81;
const POSITIVE_RESPONSE: [u8; 4] = [0x82, 0x00, 0x00, 0x00];
const KEEP_ALIVE: u8 = 0x85;

const MAX_FRAME_BYTES: usize = 128 * 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Frames handled before the capture gives up on a client.
const MAX_FRAMES: usize = 4;

/// First frame of an SMB conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmbFrame {
    Smb1 { command: u8 },
    Smb2 { command: u16 },
    Unknown,
}

impl SmbFrame {
    pub fn classify(payload: &[u8]) -> Self {
        match payload {
            [0xFF, b'S', b'M', b'B', command, ..] => SmbFrame::Smb1 { command: *command },
            [0xFE, b'S', b'M', b'B', rest @ ..] if rest.len() >= 10 => SmbFrame::Smb2 {
                command: u16::from_le_bytes([rest[8], rest[9]]),
            },
            _ => SmbFrame::Unknown,
        }
    }

    pub fn dialect(&self) -> &'static str {
        match self {
            SmbFrame::Smb1 { .. } => "SMB1",
            SmbFrame::Smb2 { .. } => "SMB2",
            SmbFrame::Unknown => "unknown",
        }
    }

    pub fn command_name(&self) -> &'static str {
        match *self {
            SmbFrame::Smb1 { command: 0x72 } => "NEGOTIATE",
            SmbFrame::Smb1 { command: 0x73 } => "SESSION_SETUP_ANDX",
            SmbFrame::Smb1 { command: 0x75 } => "TREE_CONNECT_ANDX",
            SmbFrame::Smb2 { command: 0x0000 } => "NEGOTIATE",
            SmbFrame::Smb2 { command: 0x0001 } => "SESSION_SETUP",
            SmbFrame::Smb2 { command: 0x0003 } => "TREE_CONNECT",
            SmbFrame::Smb2 { command: 0x0005 } => "CREATE",
            _ => "OTHER",
        }
    }
}

/// Parse a NetBIOS session header into (type, payload length).
pub fn parse_netbios_header(header: [u8; 4]) -> (u8, usize) {
    let length = (usize::from(header[1] & 0x01) << 16)
        | (usize::from(header[2]) << 8)
        | usize::from(header[3]);
    (header[0], length)
}

pub struct SmbEngine {
    share_name: String,
    share_path: PathBuf,
    share_comment: String,
    max_connections: usize,
    drain_timeout: Duration,
}

impl SmbEngine {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            share_name: config.smb.share_name.to_uppercase(),
            share_path: config.smb.share_path.clone(),
            share_comment: config.smb.share_comment.clone(),
            max_connections: config.smb.max_connections,
            drain_timeout: Duration::from_secs(config.lifecycle.drain_timeout_secs),
        }
    }

    pub fn share_name(&self) -> &str {
        &self.share_name
    }
}

#[async_trait]
impl Engine for SmbEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Smb
    }

    fn limits(&self) -> ConnectionLimits {
        ConnectionLimits::new(self.max_connections)
    }

    async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.share_path).await?;
        tracing::info!(
            share = %self.share_name,
            path = %self.share_path.display(),
            comment = %self.share_comment,
            "Share added"
        );
        Ok(())
    }

    async fn serve(
        &self,
        listener: Listener,
        _bound: AddressSpec,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServiceError> {
        let handler = Arc::new(SmbHandler {
            share_name: self.share_name.clone(),
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

struct SmbHandler {
    share_name: String,
}

impl SmbHandler {
    async fn capture(&self, stream: &mut TcpStream, ctx: &ConnectionContext) -> std::io::Result<()> {
        for _ in 0..MAX_FRAMES {
            let (kind, payload) = match read_frame(stream).await? {
                Some(frame) => frame,
                None => return Ok(()),
            };

            match kind {
                SESSION_REQUEST => {
                    tracing::debug!(connection = %ctx.identity(), "NetBIOS session request");
                    stream.write_all(&POSITIVE_RESPONSE).await?;
                }
                KEEP_ALIVE => {}
                SESSION_MESSAGE => {
                    let frame = SmbFrame::classify(&payload);
                    tracing::info!(
                        connection = %ctx.identity(),
                        share = %self.share_name,
                        dialect = frame.dialect(),
                        command = frame.command_name(),
                        bytes = payload.len(),
                        "SMB frame captured"
                    );
                    return Ok(());
                }
                other => {
                    tracing::debug!(connection = %ctx.identity(), kind = other, "Unexpected NetBIOS packet");
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionHandler for SmbHandler {
    async fn handle(&self, mut stream: TcpStream, ctx: ConnectionContext) {
        let mut shutdown = ctx.shutdown.clone();
        let result = tokio::select! {
            _ = shutdown.recv() => Ok(()),
            result = tokio::time::timeout(READ_TIMEOUT, self.capture(&mut stream, &ctx)) => {
                result.unwrap_or_else(|_| Err(std::io::ErrorKind::TimedOut.into()))
            }
        };
        if let Err(e) = result {
            tracing::debug!(connection = %ctx.identity(), error = %e, "SMB capture ended with error");
        }
        let _ = stream.shutdown().await;
    }
}

/// Read one NetBIOS packet; `None` on a clean EOF before the header.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> std::io::Result<Option<(u8, Vec<u8>)>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let (kind, length) = parse_netbios_header(header);
    if length > MAX_FRAME_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("NetBIOS frame of {length} bytes exceeds limit"),
        ));
    }

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;
    Ok(Some((kind, payload)))
}
