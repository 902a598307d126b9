use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport configuration error: {0}")]
    Config(String),
}
