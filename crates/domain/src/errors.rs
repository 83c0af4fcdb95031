use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DotError {
    #[error("Connection already initialized")]
    AlreadyInitialized,

    #[error("Connection not initialized")]
    NotInitialized,

    #[error("Failed to build I/O runtime: {0}")]
    Runtime(String),

    #[error("Failed to load trust anchors: {0}")]
    TrustAnchors(String),

    #[error("Invalid pinned certificate: {0}")]
    InvalidCertificate(String),

    #[error("Invalid TLS hostname: {0}")]
    InvalidHostname(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    #[error("Socket setup failed for {server}: {reason}")]
    Socket { server: String, reason: String },

    #[error("Connection to {server} failed: {reason}")]
    Connect { server: String, reason: String },

    #[error("Timeout connecting to {server}")]
    ConnectTimeout { server: String },

    #[error("TLS handshake with {server} failed: {reason}")]
    Handshake { server: String, reason: String },

    #[error("Timeout during TLS handshake with {server}")]
    HandshakeTimeout { server: String },

    #[error("Query too large to frame: {0} bytes")]
    QueryTooLarge(usize),

    #[error("Validation of {server} failed: {reason}")]
    Validation { server: String, reason: String },
}
