use std::{io, time::Duration};

/// Failures of the shared-memory channel.
///
/// Setup errors (`Map`, `Semaphore`, `Layout`) are fatal to the caller; nothing
/// in this crate retries them.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to map shared memory object '{name}'")]
    Map {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to open semaphore '{name}'")]
    Semaphore {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("shared layout rejected: {0}")]
    Layout(&'static str),

    #[error("wait on semaphore '{name}' failed")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("post on semaphore '{name}' failed")]
    Post {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to unlink '{name}'")]
    Unlink {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out after {0:?} waiting for a peer")]
    Timeout(Duration),

    #[error("refusing to publish a record that is not marked valid")]
    InvalidRecord,
}
