use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default directory holding the system's PEM-encoded CA certificates.
pub const DEFAULT_CA_DIRECTORY: &str = "/etc/ssl/certs";

/// Matches the kernel's default SYN retry budget (`tcp_syn_retries = 6`).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(127);

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(20);

/// Where certificate verification finds its trust anchors.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrustAnchors {
    /// Every PEM file in this directory.
    SystemDirectory(PathBuf),
    /// The Mozilla root set compiled into the binary.
    Bundled,
}

impl Default for TrustAnchors {
    fn default() -> Self {
        TrustAnchors::SystemDirectory(PathBuf::from(DEFAULT_CA_DIRECTORY))
    }
}

/// One DNS-over-TLS server endpoint (RFC 7858).
///
/// A server without a hostname is contacted in opportunistic mode: the
/// certificate it presents is not verified at all. A pinned certificate
/// replaces the configured trust anchors entirely and is meant for tests and
/// diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DotServer {
    pub addr: SocketAddr,
    pub hostname: Option<Arc<str>>,
    pub certificate: Option<Arc<str>>,
    pub mark: Option<u32>,
    pub tcp_fast_open: bool,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub trust_anchors: TrustAnchors,
}

impl DotServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            hostname: None,
            certificate: None,
            mark: None,
            tcp_fast_open: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            trust_anchors: TrustAnchors::default(),
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<Arc<str>>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Pins a PEM-encoded CA certificate as the only trust anchor.
    pub fn with_certificate(mut self, pem: impl Into<Arc<str>>) -> Self {
        self.certificate = Some(pem.into());
        self
    }

    pub fn with_mark(mut self, mark: u32) -> Self {
        self.mark = Some(mark);
        self
    }

    pub fn with_tcp_fast_open(mut self, enabled: bool) -> Self {
        self.tcp_fast_open = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_trust_anchors(mut self, anchors: TrustAnchors) -> Self {
        self.trust_anchors = anchors;
        self
    }

    /// Strict mode: the peer must present a certificate valid for `hostname`.
    pub fn is_strict(&self) -> bool {
        self.hostname.is_some()
    }
}

impl fmt::Display for DotServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(hostname) => write!(f, "{}({})", hostname, self.addr),
            None => write!(f, "{}", self.addr),
        }
    }
}
