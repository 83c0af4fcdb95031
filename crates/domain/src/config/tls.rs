use serde::{Deserialize, Serialize};

use crate::dot_server::{TrustAnchors, DEFAULT_CA_DIRECTORY};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Directory of PEM CA certificates used for strict verification.
    #[serde(default)]
    pub ca_directory: Option<String>,

    /// Use the bundled Mozilla roots instead of a CA directory.
    #[serde(default)]
    pub bundled_roots: bool,

    /// Servers remembered by the session cache.
    #[serde(default = "default_session_cache_servers")]
    pub session_cache_servers: usize,

    /// TLS 1.3 tickets kept per server.
    #[serde(default = "default_session_cache_tickets")]
    pub session_cache_tickets: usize,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            ca_directory: None,
            bundled_roots: false,
            session_cache_servers: default_session_cache_servers(),
            session_cache_tickets: default_session_cache_tickets(),
        }
    }
}

impl TlsConfig {
    pub fn trust_anchors(&self) -> TrustAnchors {
        if self.bundled_roots {
            return TrustAnchors::Bundled;
        }
        let dir = self.ca_directory.as_deref().unwrap_or(DEFAULT_CA_DIRECTORY);
        TrustAnchors::SystemDirectory(dir.into())
    }
}

fn default_session_cache_servers() -> usize {
    32
}

fn default_session_cache_tickets() -> usize {
    5
}
