use crate::connection::Connection;
use crate::error::ServerError;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownToken;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Name assigned when the registration line carries no usable username.
pub const ANONYMOUS_USER: &str = "Anonymous";

const MIN_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `host:port`; port 0 picks an ephemeral port.
    pub bind_addr: String,
    pub welcome_text: String,
    /// Read timeout on worker sockets, i.e. how often a worker checks for shutdown.
    pub read_poll: Duration,
    /// Upper bound on one send to one recipient.
    pub write_timeout: Duration,
    /// Longest accepted line, excluding the terminator.
    pub max_line_bytes: usize,
    /// Sleep between accept attempts when nothing is pending.
    pub accept_poll: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            welcome_text: "Please send your username".to_string(),
            read_poll: Duration::from_millis(250),
            write_timeout: Duration::from_secs(2),
            max_line_bytes: 8192,
            accept_poll: Duration::from_millis(50),
        }
    }
}

pub struct ChatServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    shutdown: ShutdownToken,
}

impl ChatServer {
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let bind_err = |source| ServerError::Bind {
            addr: config.bind_addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&config.bind_addr).map_err(bind_err)?;
        // Nonblocking accept lets the loop observe shutdown.
        listener.set_nonblocking(true).map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;

        let config = ServerConfig {
            read_poll: config.read_poll.max(MIN_POLL),
            write_timeout: config.write_timeout.max(MIN_POLL),
            accept_poll: config.accept_poll.max(MIN_POLL),
            max_line_bytes: config.max_line_bytes.max(1),
            ..config
        };

        Ok(Self {
            listener,
            local_addr,
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            shutdown: ShutdownToken::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops [`ChatServer::run`] when triggered, from any thread.
    pub fn shutdown_handle(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until shutdown is triggered, then close every
    /// socket and join every worker.
    pub fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.local_addr, "chat server listening");
        let mut workers: Vec<JoinHandle<()>> = Vec::new();

        while self.shutdown.is_running() {
            match self.listener.accept() {
                Ok((stream, peer)) => match self.spawn_worker(stream, peer) {
                    Ok(handle) => workers.push(handle),
                    Err(e) => tracing::warn!(peer = %peer, error = %e, "failed to start worker"),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    workers.retain(|w| !w.is_finished());
                    thread::sleep(self.config.accept_poll);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    thread::sleep(self.config.accept_poll);
                }
            }
        }

        tracing::info!("shutdown requested, closing connections");
        drop(self.listener);
        let closed = self.registry.close_all();
        tracing::debug!(closed, workers = workers.len(), "waiting for workers");
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("connection worker panicked");
            }
        }
        tracing::info!("shutdown complete");
        Ok(())
    }

    fn spawn_worker(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<JoinHandle<()>> {
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(Some(self.config.read_poll))?;
        stream.set_write_timeout(Some(self.config.write_timeout))?;
        stream.set_nodelay(true)?;
        let reader = stream.try_clone()?;

        let id = self.registry.insert(stream);
        tracing::info!(conn = %id, peer = %peer, "client connected");

        let conn = Connection::new(
            id,
            reader,
            Arc::clone(&self.registry),
            self.shutdown.clone(),
            Arc::clone(&self.config),
        );
        let spawned = thread::Builder::new()
            .name(format!("parley-conn-{}", id))
            .spawn(move || conn.run());
        if spawned.is_err() {
            self.registry.remove(id);
        }
        spawned
    }
}
