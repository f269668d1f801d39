//! Per-connection console state machine.
//!
//! # States
//! ```text
//! accept → welcome → Prompting ─┬─ help/status/unknown → Prompting
//!                               ├─ exit               → Closed
//!                               └─ EOF / read error   → Closed
//! ```
//!
//! A session owns its transport halves exclusively and only shares a
//! read-only `AddressSpec` with the backend.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::AddressSpec;
use crate::console::command::Command;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;

pub const PROMPT: &str = "ssh-server> ";
pub const WELCOME: &str = "Welcome to the SSH-server console. Type 'help' for more information.";
pub const HELP_LINES: [&str; 3] = [
    "  help - Display this help message.",
    "  exit - Exit the console.",
    "  status - Display the server status.",
];

const LINE_ENDING: &str = "\r\n";
const MAX_LINE_BYTES: u64 = 4096;

/// Failures that end one session (never the backend).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("read failed: {0}")]
    Read(#[source] io::Error),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("input line exceeds {0} bytes")]
    LineTooLong(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Prompting,
    Closed,
}

/// Why a session loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent `exit`.
    Exited,
    /// Client closed the connection.
    Disconnected,
    /// The backend is stopping.
    Shutdown,
}

/// One console session.
#[derive(Debug)]
pub struct Session {
    identity: String,
    address: Arc<AddressSpec>,
    state: SessionState,
}

impl Session {
    pub fn new(identity: impl Into<String>, address: Arc<AddressSpec>) -> Self {
        Self {
            identity: identity.into(),
            address,
            state: SessionState::Prompting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Apply one command and return the response lines.
    pub fn dispatch(&mut self, command: &Command) -> Vec<String> {
        match command {
            Command::Help => HELP_LINES.iter().map(|line| line.to_string()).collect(),
            Command::Status => vec![format!("Server is running on {}.", self.address)],
            Command::Exit => {
                self.state = SessionState::Closed;
                Vec::new()
            }
            Command::Unknown(raw) => vec![format!(
                "Unknown command '{raw}'. Type 'help' for more information."
            )],
        }
    }

    /// Drive the session over a transport until it closes.
    ///
    /// The session is `Closed` afterwards whatever the outcome.
    pub async fn run<R, W>(
        &mut self,
        mut reader: R,
        mut writer: W,
        mut shutdown: ShutdownSignal,
    ) -> Result<SessionEnd, SessionError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.serve(&mut reader, &mut writer, &mut shutdown).await;
        self.state = SessionState::Closed;
        result
    }

    async fn serve<R, W>(
        &mut self,
        reader: &mut R,
        writer: &mut W,
        shutdown: &mut ShutdownSignal,
    ) -> Result<SessionEnd, SessionError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        write_line(writer, WELCOME).await?;

        let mut line = String::new();
        while self.state == SessionState::Prompting {
            if shutdown.is_triggered() {
                return Ok(SessionEnd::Shutdown);
            }

            writer
                .write_all(PROMPT.as_bytes())
                .await
                .map_err(SessionError::Write)?;
            writer.flush().await.map_err(SessionError::Write)?;

            line.clear();
            let read = tokio::select! {
                _ = shutdown.recv() => return Ok(SessionEnd::Shutdown),
                read = read_line(reader, &mut line) => read?,
            };
            if read == 0 {
                return Ok(SessionEnd::Disconnected);
            }

            let command = Command::parse(&line);
            tracing::info!(
                connection = %self.identity,
                command = command.label(),
                "[{}] -> {}",
                self.identity,
                line.trim()
            );
            metrics::record_console_command(command.label());

            for response in self.dispatch(&command) {
                write_line(writer, &response).await?;
            }
        }

        Ok(SessionEnd::Exited)
    }
}

async fn read_line<R>(reader: &mut R, line: &mut String) -> Result<usize, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let read = reader
        .take(MAX_LINE_BYTES)
        .read_line(line)
        .await
        .map_err(SessionError::Read)?;
    if read as u64 == MAX_LINE_BYTES && !line.ends_with('\n') {
        return Err(SessionError::LineTooLong(MAX_LINE_BYTES));
    }
    Ok(read)
}

async fn write_line<W>(writer: &mut W, text: &str) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("{text}{LINE_ENDING}").as_bytes())
        .await
        .map_err(SessionError::Write)?;
    writer.flush().await.map_err(SessionError::Write)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;

    fn session() -> Session {
        Session::new("conn-1@127.0.0.1:50000", Arc::new(AddressSpec::new("127.0.0.1", 2222)))
    }

    async fn transcript(input: &[u8]) -> (Result<SessionEnd, SessionError>, String, Session) {
        let shutdown = Shutdown::new();
        let mut session = session();
        let mut output = Vec::new();
        let end = session.run(input, &mut output, shutdown.subscribe()).await;
        (end, String::from_utf8(output).unwrap(), session)
    }

    #[test]
    fn help_is_three_lines_and_keeps_prompting() {
        let mut session = session();
        let lines = session.dispatch(&Command::Help);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("help"));
        assert!(lines[1].contains("exit"));
        assert!(lines[2].contains("status"));
        assert_eq!(session.state(), SessionState::Prompting);
    }

    #[test]
    fn status_reports_bound_address() {
        let mut session = session();
        let lines = session.dispatch(&Command::Status);
        assert_eq!(lines, vec!["Server is running on 127.0.0.1:2222.".to_string()]);
        assert_eq!(session.state(), SessionState::Prompting);
    }

    #[test]
    fn exit_closes() {
        let mut session = session();
        assert!(session.dispatch(&Command::Exit).is_empty());
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn unknown_names_the_input() {
        let mut session = session();
        let lines = session.dispatch(&Command::parse("foobar"));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("foobar"));
        assert!(lines[0].starts_with("Unknown command"));
        assert_eq!(session.state(), SessionState::Prompting);
    }

    #[tokio::test]
    async fn wire_transcript_is_exact() {
        let (end, output, session) = transcript(b"help\nstatus\nfoobar\nexit\nhelp\n").await;

        assert_eq!(end.unwrap(), SessionEnd::Exited);
        assert_eq!(session.state(), SessionState::Closed);
        let expected = concat!(
            "Welcome to the SSH-server console. Type 'help' for more information.\r\n",
            "ssh-server> ",
            "  help - Display this help message.\r\n",
            "  exit - Exit the console.\r\n",
            "  status - Display the server status.\r\n",
            "ssh-server> ",
            "Server is running on 127.0.0.1:2222.\r\n",
            "ssh-server> ",
            "Unknown command 'foobar'. Type 'help' for more information.\r\n",
            "ssh-server> ",
        );
        assert_eq!(output, expected);
    }

    #[tokio::test]
    async fn eof_ends_session_as_disconnected() {
        let (end, output, session) = transcript(b"help\r\n").await;
        assert_eq!(end.unwrap(), SessionEnd::Disconnected);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(output.ends_with("ssh-server> "));
    }

    #[tokio::test]
    async fn invalid_utf8_ends_session_with_error() {
        let (end, _, session) = transcript(b"\xff\xfe\n").await;
        assert!(matches!(end, Err(SessionError::Read(_))));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn oversized_line_ends_session() {
        let input = vec![b'a'; 5000];
        let (end, _, session) = transcript(&input).await;
        assert!(matches!(end, Err(SessionError::LineTooLong(_))));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn shutdown_ends_waiting_session() {
        let shutdown = Shutdown::new();
        let mut session = session();
        let (client, server) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(server);
        let signal = shutdown.subscribe();

        let task = tokio::spawn(async move {
            let end = session
                .run(tokio::io::BufReader::new(read), write, signal)
                .await;
            (end, session.state())
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        shutdown.trigger();

        let (end, state) = task.await.unwrap();
        assert_eq!(end.unwrap(), SessionEnd::Shutdown);
        assert_eq!(state, SessionState::Closed);
        drop(client);
    }
}
