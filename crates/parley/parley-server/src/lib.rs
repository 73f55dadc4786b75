//! Thread-per-connection chat broadcast server.
//!
//! Each accepted socket gets its own OS thread that runs the registration
//! handshake and then relays every line it reads to all other registered
//! connections through the shared [`ConnectionRegistry`].

mod connection;
mod error;
mod registry;
mod server;
mod shutdown;

pub use error::ServerError;
pub use registry::{BroadcastReport, ConnectionId, ConnectionRegistry};
pub use server::{ANONYMOUS_USER, ChatServer, ServerConfig};
pub use shutdown::ShutdownToken;
