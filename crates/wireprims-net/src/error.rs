use std::net::{Ipv4Addr, SocketAddr};

/// Errors that can occur in endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to bind to the specified address.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// The payload exceeds the endpoint's send ceiling.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The address is outside the multicast range (224.0.0.0/4).
    #[error("not a multicast address: {0}")]
    NotMulticast(Ipv4Addr),

    /// The endpoint is closing or already closed.
    #[error("endpoint is closed")]
    Closed,

    /// The shared event loop has been shut down.
    #[error("event loop unavailable")]
    LoopUnavailable,

    /// An I/O error occurred on the endpoint socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, NetError>;
