use std::io;

/// Server-level failures. Per-connection errors never surface here; they only
/// end the connection they happened on.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind '{addr}'")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}
