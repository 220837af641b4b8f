use std::{net::SocketAddr, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

/// Error type for per-server shutdown
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerError {
    /// In-flight requests did not drain before the deadline
    #[error("Server '{server}' did not drain within {grace:?}")]
    DrainTimeout { server: String, grace: Duration },
    /// The server task panicked or was cancelled
    #[error("Server '{server}' task failed: {message}")]
    Task { server: String, message: String },
    /// The accept loop ended with an I/O error
    #[error("Server '{server}' I/O error: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },
}

/// ManagedServer defines the port for one running network server owned by
/// the listener.
#[async_trait]
pub trait ManagedServer: Send + Sync {
    /// Name used in logs (`http`, `https`)
    fn name(&self) -> &str;

    /// Address the server is bound to
    fn local_addr(&self) -> SocketAddr;

    /// Stop accepting connections and drain in-flight requests, abandoning
    /// whatever is still running at `deadline`.
    ///
    /// Calling it a second time is a no-op.
    async fn shutdown(&mut self, deadline: Instant) -> Result<(), ServerError>;
}
