//! Thread-safe registry of live connections.
//!
//! Every mutation and every broadcast happens under one mutex, so two
//! broadcasts from different workers never interleave their per-recipient
//! writes. Each write is bounded by the socket's write timeout, which keeps a
//! stuck recipient from holding the lock indefinitely.

use std::fmt;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Handle of one accepted connection, unique for the lifetime of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

struct Entry {
    id: ConnectionId,
    /// `None` until the registration line has been read.
    username: Option<String>,
    /// Flips to `false` once, on the first failed send or on disconnect.
    alive: bool,
    stream: TcpStream,
}

impl Entry {
    fn is_registered(&self) -> bool {
        self.alive && self.username.is_some()
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let result = (&self.stream).write_all(bytes);
        if let Err(e) = &result {
            tracing::warn!(
                conn = %self.id,
                user = self.username.as_deref().unwrap_or("-"),
                error = %e,
                "send failed, marking connection dead"
            );
            self.alive = false;
            // wake the peer's worker if it is parked in a read
            let _ = self.stream.shutdown(Shutdown::Both);
        }
        result
    }
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    // Vec keeps insertion order for the user list
    entries: Vec<Entry>,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: Mutex<Inner>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A worker that panicked mid-broadcast leaves the entries consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a freshly accepted connection. The registry keeps this handle for
    /// writing; the worker reads from its own clone.
    pub fn insert(&self, stream: TcpStream) -> ConnectionId {
        let mut inner = self.lock();
        let id = ConnectionId(inner.next_id);
        inner.next_id += 1;
        inner.entries.push(Entry {
            id,
            username: None,
            alive: true,
            stream,
        });
        id
    }

    /// Record the username sent during registration. Returns `false` if the
    /// connection is gone.
    pub fn set_username(&self, id: ConnectionId, username: &str) -> bool {
        let mut inner = self.lock();
        match inner.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.username = Some(username.to_string());
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self, id: ConnectionId) -> bool {
        self.lock().entries.iter().any(|e| e.id == id && e.alive)
    }

    pub fn mark_dead(&self, id: ConnectionId) {
        if let Some(entry) = self.lock().entries.iter_mut().find(|e| e.id == id) {
            entry.alive = false;
        }
    }

    /// Forget a connection and drop the registry's handle to it.
    pub fn remove(&self, id: ConnectionId) -> bool {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|e| e.id != id);
        inner.entries.len() != before
    }

    /// Send to one connection. A failure marks it dead.
    pub fn send_to(&self, id: ConnectionId, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        match inner.entries.iter_mut().find(|e| e.id == id && e.alive) {
            Some(entry) => entry.send(bytes),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                format!("connection {id} is not alive"),
            )),
        }
    }

    /// Send `bytes` to every live, registered connection except `sender`.
    ///
    /// A failed recipient is marked dead and skipped; delivery to the rest
    /// continues and the sender never sees the failure.
    pub fn broadcast(&self, bytes: &[u8], sender: Option<ConnectionId>) -> BroadcastReport {
        let mut inner = self.lock();
        let mut report = BroadcastReport::default();
        for entry in inner
            .entries
            .iter_mut()
            .filter(|e| e.is_registered() && Some(e.id) != sender)
        {
            match entry.send(bytes) {
                Ok(()) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }
        report
    }

    /// Usernames of live, registered connections in registration-insert order.
    pub fn usernames(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .filter(|e| e.is_registered())
            .filter_map(|e| e.username.clone())
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Shut down every socket and mark every connection dead. Workers blocked
    /// in a read wake up with end-of-stream. Returns how many were still alive.
    pub fn close_all(&self) -> usize {
        let mut inner = self.lock();
        let mut closed = 0;
        for entry in inner.entries.iter_mut() {
            if entry.alive {
                closed += 1;
            }
            entry.alive = false;
            let _ = entry.stream.shutdown(Shutdown::Both);
        }
        closed
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
