//! File transfer backend (control channel).
//!
//! # Responsibilities
//! - Greet with `220 <banner>` and answer control commands
//! - Keep a virtual working directory confined to the root
//! - Refuse peers over the per-IP cap with `421`
//!
//! Data-channel verbs are answered with `502`; no files are transferred.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::backend::{BackendKind, Engine};
use crate::config::{AddressSpec, ServerConfig};
use crate::lifecycle::{ServiceError, ShutdownSignal};
use crate::net::{
    accept_loop, read_line_capped, trim_line_ending, ConnectionContext, ConnectionHandler,
    ConnectionLimits, Listener,
};

const MAX_LINE_BYTES: usize = 2048;

const DATA_VERBS: &[&str] = &[
    "PORT", "PASV", "EPRT", "EPSV", "LIST", "NLST", "MLSD", "MLST", "RETR", "STOR", "STOU",
    "APPE", "REST", "ABOR", "DELE", "RMD", "MKD", "RNFR", "RNTO", "SIZE", "MDTM", "SITE",
];

/// Result of one control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Send these reply lines and keep going.
    Reply(Vec<String>),
    /// Change to this virtual directory if it exists under the root.
    ChangeDir(String),
    /// Send the reply and close.
    Close(String),
}

fn reply(line: impl Into<String>) -> Step {
    Step::Reply(vec![line.into()])
}

/// Control-channel state for one client.
#[derive(Debug)]
pub struct FtpSession {
    cwd: String,
    user: Option<String>,
    logged_in: bool,
}

impl Default for FtpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl FtpSession {
    pub fn new() -> Self {
        Self {
            cwd: "/".to_string(),
            user: None,
            logged_in: false,
        }
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in
    }

    /// Commit a directory change approved by the caller.
    pub fn enter(&mut self, path: String) {
        self.cwd = path;
    }

    pub fn handle(&mut self, line: &str) -> Step {
        let line = line.trim();
        if line.is_empty() {
            return reply("500 Command not understood.");
        }

        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
            None => (line.to_ascii_uppercase(), ""),
        };

        match verb.as_str() {
            "USER" if arg.is_empty() => reply("501 Syntax error: command needs an argument."),
            "USER" => {
                self.user = Some(arg.to_string());
                self.logged_in = false;
                reply("331 Username ok, send password.")
            }
            "PASS" => match &self.user {
                None => reply("503 Login with USER first."),
                Some(_) => {
                    self.logged_in = true;
                    reply("230 Login successful.")
                }
            },
            "QUIT" => Step::Close("221 Goodbye.".to_string()),
            "SYST" => reply("215 UNIX Type: L8"),
            "NOOP" => reply("200 NOOP ok."),
            "FEAT" => Step::Reply(vec![
                "211-Features supported:".to_string(),
                " UTF8".to_string(),
                "211 End FEAT.".to_string(),
            ]),
            "OPTS" if arg.eq_ignore_ascii_case("UTF8 ON") => reply("200 Always in UTF8 mode."),
            "OPTS" => reply("501 Invalid argument."),
            _ if !self.logged_in => reply("530 Log in with USER and PASS first."),
            "PWD" | "XPWD" => reply(format!("257 \"{}\" is the current directory.", self.cwd)),
            "CWD" | "XCWD" if arg.is_empty() => {
                reply("501 Syntax error: command needs an argument.")
            }
            "CWD" | "XCWD" => Step::ChangeDir(resolve_virtual(&self.cwd, arg)),
            "CDUP" | "XCUP" => Step::ChangeDir(resolve_virtual(&self.cwd, "..")),
            "TYPE" => match arg.to_ascii_uppercase().as_str() {
                "A" | "A N" => reply("200 Type set to: ASCII."),
                "I" | "L 8" => reply("200 Type set to: Binary."),
                _ => reply(format!("504 Unsupported type \"{arg}\".")),
            },
            "MODE" if arg.eq_ignore_ascii_case("S") => reply("200 Transfer mode set to: S"),
            "MODE" => reply("504 Unimplemented MODE type."),
            "STRU" if arg.eq_ignore_ascii_case("F") => reply("200 File transfer structure set to: F."),
            "STRU" => reply("504 Unimplemented STRU type."),
            v if DATA_VERBS.contains(&v) => reply("502 Command not implemented."),
            v => reply(format!("500 Command \"{v}\" not understood.")),
        }
    }
}

/// Resolve `arg` against `cwd` lexically; `..` never climbs above `/`.
pub fn resolve_virtual(cwd: &str, arg: &str) -> String {
    let mut parts: Vec<&str> = if arg.starts_with('/') {
        Vec::new()
    } else {
        cwd.split('/').filter(|p| !p.is_empty()).collect()
    };

    for part in arg.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    format!("/{}", parts.join("/"))
}

/// Map a virtual path onto the real filesystem under `root`.
pub fn real_path(root: &Path, virtual_path: &str) -> PathBuf {
    root.join(virtual_path.trim_start_matches('/'))
}

pub struct FtpEngine {
    root: PathBuf,
    banner: String,
    limits: ConnectionLimits,
    drain_timeout: Duration,
}

impl FtpEngine {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            root: config.ftp.root.clone(),
            banner: config.ftp.banner.clone(),
            limits: ConnectionLimits::new(config.ftp.max_connections)
                .with_max_per_peer(config.ftp.max_connections_per_ip),
            drain_timeout: Duration::from_secs(config.lifecycle.drain_timeout_secs),
        }
    }
}

#[async_trait]
impl Engine for FtpEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Ftp
    }

    fn limits(&self) -> ConnectionLimits {
        self.limits
    }

    async fn prepare(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await
    }

    async fn serve(
        &self,
        listener: Listener,
        _bound: AddressSpec,
        shutdown: ShutdownSignal,
    ) -> Result<(), ServiceError> {
        let handler = Arc::new(FtpHandler {
            root: self.root.clone(),
            banner: self.banner.clone(),
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

struct FtpHandler {
    root: PathBuf,
    banner: String,
}

impl FtpHandler {
    async fn session(&self, stream: TcpStream, ctx: &ConnectionContext) -> std::io::Result<()> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut shutdown = ctx.shutdown.clone();
        let mut session = FtpSession::new();
        let mut buf = Vec::new();

        send(&mut write, &format!("220 {}", self.banner)).await?;

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = shutdown.recv() => {
                    send(&mut write, "421 Server shutting down.").await?;
                    return Ok(());
                }
                read = read_line_capped(&mut reader, &mut buf, MAX_LINE_BYTES) => read?,
            };
            if read == 0 {
                return Ok(());
            }

            let line = String::from_utf8_lossy(trim_line_ending(&buf)).into_owned();
            tracing::debug!(connection = %ctx.id, command = %redact(&line), "FTP command");

            match session.handle(&line) {
                Step::Reply(lines) => {
                    for line in lines {
                        send(&mut write, &line).await?;
                    }
                }
                Step::ChangeDir(target) => {
                    let is_dir = tokio::fs::metadata(real_path(&self.root, &target))
                        .await
                        .map(|meta| meta.is_dir())
                        .unwrap_or(false);
                    if is_dir {
                        send(&mut write, &format!("250 \"{target}\" is the current directory.")).await?;
                        session.enter(target);
                    } else {
                        send(&mut write, &format!("550 \"{target}\": No such directory.")).await?;
                    }
                }
                Step::Close(line) => {
                    send(&mut write, &line).await?;
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for FtpHandler {
    async fn handle(&self, stream: TcpStream, ctx: ConnectionContext) {
        if let Err(e) = self.session(stream, &ctx).await {
            tracing::debug!(connection = %ctx.identity(), error = %e, "FTP session ended with error");
        }
    }

    async fn refuse(&self, mut stream: TcpStream, peer: SocketAddr) {
        tracing::info!(peer = %peer, "Too many connections from this IP");
        let _ = send(&mut stream, "421 Too many connections from the same IP address.").await;
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    writer.flush().await
}

/// Hide passwords in logs.
fn redact(line: &str) -> &str {
    if line.get(..4).is_some_and(|verb| verb.eq_ignore_ascii_case("PASS")) {
        "PASS ******"
    } else {
        line
    }
}
