//! Debugging mail relay.
//!
//! # States
//! ```text
//! Connected → HELO/EHLO → Greeted → MAIL → Mail → RCPT+ → Rcpt → DATA → Data
//!                                                                     │
//!                                    Greeted ◀── "." (accept or 552) ─┘
//! ```
//!
//! Accepted messages are logged and discarded.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::backend::{BackendKind, Engine};
use crate::config::{AddressSpec, ServerConfig};
use crate::lifecycle::{ServiceError, ShutdownSignal};
use crate::net::{
    accept_loop, read_line_capped, trim_line_ending, ConnectionContext, ConnectionHandler,
    ConnectionLimits, Listener,
};
use crate::observability::metrics;

const MAX_COMMAND_LINE: usize = 512;
const MAX_DATA_LINE: usize = 64 * 1024;

/// A message accepted at the end of DATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub mail_from: String,
    pub rcpt_tos: Vec<String>,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpStep {
    Reply(Vec<String>),
    /// Line consumed inside DATA; nothing to send.
    Continue,
    Accepted { reply: String, envelope: Envelope },
    Close(String),
}

fn reply(line: impl Into<String>) -> SmtpStep {
    SmtpStep::Reply(vec![line.into()])
}

#[derive(Debug, Default)]
struct Transaction {
    mail_from: Option<String>,
    rcpt_tos: Vec<String>,
    content: Vec<u8>,
    oversized: bool,
}

/// Protocol state for one SMTP client.
#[derive(Debug)]
pub struct SmtpSession {
    hostname: String,
    max_message_bytes: usize,
    greeted: bool,
    in_data: bool,
    tx: Transaction,
}

impl SmtpSession {
    pub fn new(hostname: impl Into<String>, max_message_bytes: usize) -> Self {
        Self {
            hostname: hostname.into(),
            max_message_bytes,
            greeted: false,
            in_data: false,
            tx: Transaction::default(),
        }
    }

    pub fn greeting(&self) -> String {
        format!("220 {} ESMTP simple-test-server", self.hostname)
    }

    pub fn in_data(&self) -> bool {
        self.in_data
    }

    /// Feed one line with its line ending removed.
    pub fn handle(&mut self, line: &[u8]) -> SmtpStep {
        if self.in_data {
            return self.data_line(line);
        }

        let line = String::from_utf8_lossy(line);
        let line = line.trim();
        if line.is_empty() {
            return reply("500 Error: bad syntax");
        }

        let (verb, arg) = match line.split_once(' ') {
            Some((verb, arg)) => (verb.to_ascii_uppercase(), arg.trim()),
            None => (line.to_ascii_uppercase(), ""),
        };

        match verb.as_str() {
            "HELO" if arg.is_empty() => reply("501 Syntax: HELO hostname"),
            "HELO" => {
                self.greeted = true;
                self.tx = Transaction::default();
                reply(format!("250 {}", self.hostname))
            }
            "EHLO" if arg.is_empty() => reply("501 Syntax: EHLO hostname"),
            "EHLO" => {
                self.greeted = true;
                self.tx = Transaction::default();
                SmtpStep::Reply(vec![
                    format!("250-{}", self.hostname),
                    format!("250-SIZE {}", self.max_message_bytes),
                    "250-8BITMIME".to_string(),
                    "250 HELP".to_string(),
                ])
            }
            "NOOP" => reply("250 OK"),
            "RSET" => {
                self.tx = Transaction::default();
                reply("250 OK")
            }
            "QUIT" => SmtpStep::Close("221 Bye".to_string()),
            "HELP" => reply("250 Supported commands: EHLO HELO MAIL RCPT DATA RSET NOOP QUIT VRFY"),
            "VRFY" if arg.is_empty() => reply("501 Syntax: VRFY <address>"),
            "VRFY" => reply("252 Cannot VRFY user, but will accept message and attempt delivery"),
            "MAIL" => self.mail(arg),
            "RCPT" => self.rcpt(arg),
            "DATA" => self.data(arg),
            _ => reply(format!("500 Error: command \"{verb}\" not recognized")),
        }
    }

    fn mail(&mut self, arg: &str) -> SmtpStep {
        if !self.greeted {
            return reply("503 Error: send HELO first");
        }
        if self.tx.mail_from.is_some() {
            return reply("503 Error: nested MAIL command");
        }
        let Some((address, params)) = parse_path(arg, "FROM:") else {
            return reply("501 Syntax: MAIL FROM: <address>");
        };

        for param in params.split_whitespace() {
            if let Some(size) = param.strip_prefix("SIZE=").or_else(|| param.strip_prefix("size=")) {
                match size.parse::<usize>() {
                    Ok(size) if size > self.max_message_bytes => {
                        return reply("552 Error: message size exceeds fixed maximum message size");
                    }
                    Ok(_) => {}
                    Err(_) => return reply("501 Syntax: MAIL FROM: <address> [SIZE=<size>]"),
                }
            }
        }

        self.tx.mail_from = Some(address);
        reply("250 OK")
    }

    fn rcpt(&mut self, arg: &str) -> SmtpStep {
        if !self.greeted {
            return reply("503 Error: send HELO first");
        }
        if self.tx.mail_from.is_none() {
            return reply("503 Error: need MAIL command");
        }
        match parse_path(arg, "TO:") {
            Some((address, _)) if !address.is_empty() => {
                self.tx.rcpt_tos.push(address);
                reply("250 OK")
            }
            _ => reply("501 Syntax: RCPT TO: <address>"),
        }
    }

    fn data(&mut self, arg: &str) -> SmtpStep {
        if !self.greeted {
            return reply("503 Error: send HELO first");
        }
        if self.tx.rcpt_tos.is_empty() {
            return reply("503 Error: need RCPT command");
        }
        if !arg.is_empty() {
            return reply("501 Syntax: DATA");
        }
        self.in_data = true;
        reply("354 End data with <CR><LF>.<CR><LF>")
    }

    fn data_line(&mut self, line: &[u8]) -> SmtpStep {
        if line == b"." {
            self.in_data = false;
            let tx = std::mem::take(&mut self.tx);
            if tx.oversized {
                return reply("552 Error: Too much mail data");
            }
            return SmtpStep::Accepted {
                reply: "250 OK".to_string(),
                envelope: Envelope {
                    mail_from: tx.mail_from.unwrap_or_default(),
                    rcpt_tos: tx.rcpt_tos,
                    content: tx.content,
                },
            };
        }

        if self.tx.oversized {
            return SmtpStep::Continue;
        }

        let line = line.strip_prefix(b".").unwrap_or(line);
        if self.tx.content.len() + line.len() + 2 > self.max_message_bytes {
            self.tx.oversized = true;
            self.tx.content.clear();
            return SmtpStep::Continue;
        }
        self.tx.content.extend_from_slice(line);
        self.tx.content.extend_from_slice(b"\r\n");
        SmtpStep::Continue
    }
}

/// Split `FROM:<addr> PARAMS` into the bare address and the parameters.
fn parse_path(arg: &str, keyword: &str) -> Option<(String, String)> {
    let head = arg.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = arg[keyword.len()..].trim_start();
    let rest = rest.strip_prefix('<')?;
    let (address, params) = rest.split_once('>')?;
    Some((address.trim().to_string(), params.trim().to_string()))
}

pub struct SmtpEngine {
    hostname: String,
    max_message_bytes: usize,
    max_connections: usize,
    drain_timeout: Duration,
}

impl SmtpEngine {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            hostname: config.smtp.hostname.clone(),
            max_message_bytes: config.smtp.max_message_bytes,
            max_connections: config.smtp.max_connections,
            drain_timeout: Duration::from_secs(config.lifecycle.drain_timeout_secs),
        }
    }
}

#[async_trait]
impl Engine for SmtpEngine {
    fn kind(&self) -> BackendKind {
        BackendKind::Smtp
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
        let handler = Arc::new(SmtpHandler {
            hostname: self.hostname.clone(),
            max_message_bytes: self.max_message_bytes,
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

struct SmtpHandler {
    hostname: String,
    max_message_bytes: usize,
}

impl SmtpHandler {
    async fn session(&self, stream: TcpStream, ctx: &ConnectionContext) -> std::io::Result<()> {
        let (read, mut write) = stream.into_split();
        let mut reader = BufReader::new(read);
        let mut shutdown = ctx.shutdown.clone();
        let mut session = SmtpSession::new(self.hostname.clone(), self.max_message_bytes);
        let mut buf = Vec::new();

        send(&mut write, &session.greeting()).await?;

        loop {
            let max = if session.in_data() {
                MAX_DATA_LINE
            } else {
                MAX_COMMAND_LINE
            };
            buf.clear();
            let read = tokio::select! {
                _ = shutdown.recv() => {
                    send(&mut write, "421 Service not available, closing transmission channel").await?;
                    return Ok(());
                }
                read = read_line_capped(&mut reader, &mut buf, max) => read?,
            };
            if read == 0 {
                return Ok(());
            }

            match session.handle(trim_line_ending(&buf)) {
                SmtpStep::Reply(lines) => {
                    for line in lines {
                        send(&mut write, &line).await?;
                    }
                }
                SmtpStep::Continue => {}
                SmtpStep::Accepted { reply, envelope } => {
                    log_message(ctx, &envelope);
                    metrics::record_smtp_message();
                    send(&mut write, &reply).await?;
                }
                SmtpStep::Close(line) => {
                    send(&mut write, &line).await?;
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for SmtpHandler {
    async fn handle(&self, stream: TcpStream, ctx: ConnectionContext) {
        if let Err(e) = self.session(stream, &ctx).await {
            tracing::debug!(connection = %ctx.identity(), error = %e, "SMTP session ended with error");
        }
    }
}

fn log_message(ctx: &ConnectionContext, envelope: &Envelope) {
    let message_id = Uuid::new_v4();
    tracing::info!(
        connection = %ctx.identity(),
        %message_id,
        mail_from = %envelope.mail_from,
        rcpt_tos = ?envelope.rcpt_tos,
        bytes = envelope.content.len(),
        "Message accepted"
    );
    for line in String::from_utf8_lossy(&envelope.content).lines() {
        tracing::debug!(%message_id, "{}", line);
    }
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greeted() -> SmtpSession {
        let mut session = SmtpSession::new("mx.test", 64);
        session.handle(b"HELO client");
        session
    }

    #[test]
    fn full_transaction_is_accepted() {
        let mut s = greeted();
        assert_eq!(s.handle(b"MAIL FROM:<a@x.test>"), reply("250 OK"));
        assert_eq!(s.handle(b"RCPT TO:<b@y.test>"), reply("250 OK"));
        assert_eq!(s.handle(b"DATA"), reply("354 End data with <CR><LF>.<CR><LF>"));
        assert!(s.in_data());
        assert_eq!(s.handle(b"Subject: hi"), SmtpStep::Continue);
        assert_eq!(s.handle(b"..dotted"), SmtpStep::Continue);

        let SmtpStep::Accepted { reply, envelope } = s.handle(b".") else {
            panic!("expected acceptance");
        };
        assert_eq!(reply, "250 OK");
        assert_eq!(envelope.mail_from, "a@x.test");
        assert_eq!(envelope.rcpt_tos, vec!["b@y.test".to_string()]);
        assert_eq!(envelope.content, b"Subject: hi\r\n.dotted\r\n");
        assert!(!s.in_data());
    }

    #[test]
    fn sequencing_errors() {
        let mut s = SmtpSession::new("mx.test", 64);
        assert_eq!(s.handle(b"MAIL FROM:<a@x>"), reply("503 Error: send HELO first"));

        let mut s = greeted();
        assert_eq!(s.handle(b"RCPT TO:<b@y>"), reply("503 Error: need MAIL command"));
        assert_eq!(s.handle(b"DATA"), reply("503 Error: need RCPT command"));
        s.handle(b"MAIL FROM:<a@x>");
        assert_eq!(s.handle(b"MAIL FROM:<a@x>"), reply("503 Error: nested MAIL command"));
    }

    #[test]
    fn syntax_errors() {
        let mut s = greeted();
        assert_eq!(s.handle(b"MAIL a@x"), reply("501 Syntax: MAIL FROM: <address>"));
        s.handle(b"MAIL FROM:<>");
        assert_eq!(s.handle(b"RCPT TO:b@y"), reply("501 Syntax: RCPT TO: <address>"));
        assert_eq!(s.handle(b"HELO"), reply("501 Syntax: HELO hostname"));
        assert_eq!(s.handle(b""), reply("500 Error: bad syntax"));
        assert_eq!(s.handle(b"WHAT"), reply("500 Error: command \"WHAT\" not recognized"));
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut s = greeted();
        s.handle(b"MAIL FROM:<a@x>");
        s.handle(b"RCPT TO:<b@y>");
        s.handle(b"DATA");
        s.handle(&[b'x'; 100]);
        assert_eq!(s.handle(b"."), reply("552 Error: Too much mail data"));
        assert_eq!(s.handle(b"NOOP"), reply("250 OK"));
    }

    #[test]
    fn declared_size_over_limit_is_rejected() {
        let mut s = greeted();
        assert_eq!(
            s.handle(b"MAIL FROM:<a@x> SIZE=1000"),
            reply("552 Error: message size exceeds fixed maximum message size")
        );
    }

    #[test]
    fn ehlo_advertises_size() {
        let mut s = SmtpSession::new("mx.test", 64);
        let SmtpStep::Reply(lines) = s.handle(b"EHLO client") else {
            panic!("expected reply");
        };
        assert_eq!(lines[0], "250-mx.test");
        assert!(lines.contains(&"250-SIZE 64".to_string()));
        assert_eq!(lines.last().unwrap(), "250 HELP");
    }

    #[test]
    fn rset_clears_transaction() {
        let mut s = greeted();
        s.handle(b"MAIL FROM:<a@x>");
        assert_eq!(s.handle(b"RSET"), reply("250 OK"));
        assert_eq!(s.handle(b"MAIL FROM:<a@x>"), reply("250 OK"));
        assert_eq!(s.handle(b"QUIT"), SmtpStep::Close("221 Bye".into()));
    }
}
