use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use super::errors::ConfigError;
use crate::dot_server::{TrustAnchors, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT};
use crate::DotServer;

/// One `[[servers]]` table of the configuration file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerEntry {
    /// `ip:port`, usually port 853.
    pub address: String,

    #[serde(default)]
    pub hostname: Option<String>,

    /// PEM file pinned as the only trust anchor (testing only).
    #[serde(default)]
    pub certificate_path: Option<String>,

    #[serde(default)]
    pub mark: Option<u32>,

    #[serde(default = "default_true")]
    pub tcp_fast_open: bool,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl ServerEntry {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            hostname: None,
            certificate_path: None,
            mark: None,
            tcp_fast_open: true,
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.address.parse().map_err(|e| {
            ConfigError::Validation(format!("Invalid server address '{}': {}", self.address, e))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let addr = self.socket_addr()?;
        if addr.port() == 0 {
            return Err(ConfigError::Validation(format!(
                "Server '{}' has port 0",
                self.address
            )));
        }
        if self.connect_timeout_ms == 0 || self.idle_timeout_ms == 0 {
            return Err(ConfigError::Validation(format!(
                "Server '{}' has a zero timeout",
                self.address
            )));
        }
        if matches!(self.hostname.as_deref(), Some("")) {
            return Err(ConfigError::Validation(format!(
                "Server '{}' has an empty hostname",
                self.address
            )));
        }
        Ok(())
    }

    /// Builds the runtime identity, reading the pinned certificate if any.
    pub fn to_server(&self, trust_anchors: TrustAnchors) -> Result<DotServer, ConfigError> {
        let mut server = DotServer::new(self.socket_addr()?)
            .with_tcp_fast_open(self.tcp_fast_open)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_idle_timeout(Duration::from_millis(self.idle_timeout_ms))
            .with_trust_anchors(trust_anchors);

        if let Some(hostname) = &self.hostname {
            server = server.with_hostname(hostname.as_str());
        }
        if let Some(mark) = self.mark {
            server = server.with_mark(mark);
        }
        if let Some(path) = &self.certificate_path {
            let pem = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::CertificateRead(path.clone(), e.to_string()))?;
            server = server.with_certificate(pem);
        }
        Ok(server)
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_millis() as u64
}
