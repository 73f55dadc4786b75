//! Per-connection worker.
//!
//! ```text
//! Accepted ──welcome──▶ AwaitingUsername ──line──▶ Active ──EOF/error──▶ Closed
//!                              │                      │
//!                              └──────EOF────────────▶┘
//! ```

use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::server::{ANONYMOUS_USER, ServerConfig};
use crate::shutdown::ShutdownToken;
use parley_events::{MAX_USERNAME_LEN, now_iso8601, truncate_utf8};
use parley_proto::{ChatLine, Frame, ProtoError};
use std::io::{self, BufRead, BufReader, Read};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

enum ReadOutcome {
    /// One line without its `\n`; any `\r` before it is kept.
    Line(Vec<u8>),
    /// Read timeout expired with no complete line; partial input is kept.
    Idle,
    Closed,
    TooLong,
}

pub(crate) struct Connection {
    id: ConnectionId,
    reader: BufReader<TcpStream>,
    pending: Vec<u8>,
    registry: Arc<ConnectionRegistry>,
    shutdown: ShutdownToken,
    config: Arc<ServerConfig>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        stream: TcpStream,
        registry: Arc<ConnectionRegistry>,
        shutdown: ShutdownToken,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            id,
            reader: BufReader::new(stream),
            pending: Vec::new(),
            registry,
            shutdown,
            config,
        }
    }

    pub(crate) fn run(mut self) {
        match self.handshake() {
            Some(username) => {
                self.serve(&username);
                self.close(&username);
            }
            None => {
                self.registry.remove(self.id);
                let _ = self.reader.get_ref().shutdown(Shutdown::Both);
            }
        }
    }

    // Accepted -> AwaitingUsername -> Active. None means the peer left first.
    fn handshake(&mut self) -> Option<String> {
        let welcome = encode(&Frame::welcome(self.config.welcome_text.as_str()))?;
        if self.registry.send_to(self.id, welcome.as_bytes()).is_err() {
            return None;
        }

        let line = loop {
            match self.read_line() {
                ReadOutcome::Line(line) => break line,
                ReadOutcome::Idle if self.shutdown.is_running() => continue,
                ReadOutcome::Idle | ReadOutcome::Closed | ReadOutcome::TooLong => {
                    tracing::info!(conn = %self.id, "client disconnected before sending username");
                    return None;
                }
            }
        };

        let username = registered_name(&String::from_utf8_lossy(&line));
        self.registry.set_username(self.id, &username);
        tracing::info!(conn = %self.id, user = %username, "client registered");

        if let Some(join) = encode(&Frame::notice(format!("{username} joined the chat"))) {
            self.registry.broadcast(join.as_bytes(), Some(self.id));
        }
        if let Some(list) = encode(&Frame::user_list(self.registry.usernames())) {
            let _ = self.registry.send_to(self.id, list.as_bytes());
        }
        Some(username)
    }

    fn serve(&mut self, username: &str) {
        while self.shutdown.is_running() && self.registry.is_alive(self.id) {
            match self.read_line() {
                ReadOutcome::Line(line) if line.iter().all(u8::is_ascii_whitespace) => continue,
                ReadOutcome::Line(line) => self.relay(username, line),
                ReadOutcome::Idle => continue,
                ReadOutcome::Closed => {
                    tracing::info!(conn = %self.id, user = %username, "client disconnected");
                    break;
                }
                ReadOutcome::TooLong => {
                    tracing::warn!(
                        conn = %self.id,
                        user = %username,
                        limit = self.config.max_line_bytes,
                        "line too long, closing connection"
                    );
                    break;
                }
            }
        }
    }

    fn relay(&self, username: &str, mut line: Vec<u8>) {
        tracing::debug!(conn = %self.id, user = %username, bytes = line.len(), "relaying");
        // Structured chat lines pass through byte for byte; anything else is wrapped.
        let is_chat = matches!(
            std::str::from_utf8(&line).map(Frame::decode),
            Ok(Ok(Frame::Chat(_)))
        );
        let payload = if is_chat {
            line.push(b'\n');
            Some(line)
        } else {
            let text = String::from_utf8_lossy(&line);
            encode(&Frame::chat(username, now_iso8601(), text.trim_end_matches('\r')))
                .map(String::into_bytes)
        };
        if let Some(payload) = payload {
            let report = self.registry.broadcast(&payload, Some(self.id));
            if report.failed > 0 {
                tracing::debug!(conn = %self.id, failed = report.failed, "partial broadcast");
            }
        }
    }

    // Active -> Closed
    fn close(self, username: &str) {
        self.registry.mark_dead(self.id);
        if let Some(leave) = encode(&Frame::notice(format!("{username} left the chat"))) {
            self.registry.broadcast(leave.as_bytes(), Some(self.id));
        }
        self.registry.remove(self.id);
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        tracing::info!(conn = %self.id, user = %username, "connection closed");
    }

    fn read_line(&mut self) -> ReadOutcome {
        let limit = self.config.max_line_bytes;
        loop {
            let room = (limit + 1).saturating_sub(self.pending.len()) as u64;
            let result = (&mut self.reader)
                .take(room)
                .read_until(b'\n', &mut self.pending);
            match result {
                Ok(0) => return ReadOutcome::Closed,
                Ok(_) if self.pending.last() == Some(&b'\n') => {
                    let mut bytes = std::mem::take(&mut self.pending);
                    bytes.pop();
                    return ReadOutcome::Line(bytes);
                }
                Ok(_) if self.pending.len() > limit => return ReadOutcome::TooLong,
                // end of stream mid-line; the next read reports Ok(0)
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) =>
                {
                    return ReadOutcome::Idle;
                }
                Err(e) => {
                    tracing::debug!(conn = %self.id, error = %e, "read failed");
                    return ReadOutcome::Closed;
                }
            }
        }
    }
}

/// Username from the registration line, or the anonymous placeholder.
pub(crate) fn registered_name(line: &str) -> String {
    match Frame::decode(line) {
        Ok(Frame::Hello { user }) | Ok(Frame::Chat(ChatLine { user, .. }))
            if !user.trim().is_empty() =>
        {
            truncate_utf8(user.trim(), MAX_USERNAME_LEN - 1).to_string()
        }
        Ok(_) | Err(ProtoError::Empty) => ANONYMOUS_USER.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "malformed registration line");
            ANONYMOUS_USER.to_string()
        }
    }
}

fn encode(frame: &Frame) -> Option<String> {
    match frame.encode() {
        Ok(line) => Some(line),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_from_hello() {
        assert_eq!(registered_name("{\"user\":\"alice\"}"), "alice");
        assert_eq!(registered_name("{\"user\":\"  bob \"}"), "bob");
    }

    #[test]
    fn username_from_chat_shaped_registration() {
        assert_eq!(
            registered_name("{\"user\":\"carol\",\"time\":\"t\",\"text\":\"hi\"}"),
            "carol"
        );
    }

    #[test]
    fn malformed_or_missing_username_is_anonymous() {
        assert_eq!(registered_name("alice"), ANONYMOUS_USER);
        assert_eq!(registered_name("{}"), ANONYMOUS_USER);
        assert_eq!(registered_name("{\"user\":\"\"}"), ANONYMOUS_USER);
        assert_eq!(registered_name("{\"name\":\"x\",\"user\":5}"), ANONYMOUS_USER);
        assert_eq!(registered_name("{\"type\":\"welcome\",\"text\":\"x\"}"), ANONYMOUS_USER);
        assert_eq!(registered_name(""), ANONYMOUS_USER);
    }

    #[test]
    fn long_username_is_truncated() {
        let line = format!("{{\"user\":\"{}\"}}", "n".repeat(40));
        assert_eq!(registered_name(&line), "n".repeat(31));
    }
}
