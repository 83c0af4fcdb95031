//! Private DNS server validation.
//!
//! A server is only worth routing traffic to if it actually answers over DoT.
//! The probe opens a dedicated connection, asks for an A record under a
//! random label and accepts the server on a NOERROR answer carrying the
//! query's transaction id.

use bytes::Bytes;
use ferrous_dot_domain::{DotError, DotServer};
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{DNSClass, Name, RecordType};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::transport::tls::{ConnectionObserver, DotConnection, SessionCache};

pub const DEFAULT_PROBE_DOMAIN: &str = "metric.gstatic.com";
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

const PROBE_LABEL_SUFFIX: &str = "-dnsotls-ds";

#[derive(Debug, Clone)]
pub struct ServerValidator {
    probe_domain: String,
    timeout: Duration,
}

impl Default for ServerValidator {
    fn default() -> Self {
        Self {
            probe_domain: DEFAULT_PROBE_DOMAIN.to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

impl ServerValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_domain(mut self, domain: impl Into<String>) -> Self {
        self.probe_domain = domain.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Probes `server` over a fresh connection. Blocks for up to the
    /// server's connect timeout plus the probe timeout.
    pub fn validate(
        &self,
        server: &DotServer,
        cache: Arc<dyn SessionCache>,
    ) -> Result<(), DotError> {
        let failed = |reason: String| DotError::Validation {
            server: server.to_string(),
            reason,
        };

        let (id, query) = build_probe(&self.probe_domain)?;
        let (observer, events) = ProbeObserver::channel();
        let connection = DotConnection::new(server.clone(), cache, observer);

        if !connection.initialize() {
            return Err(failed("connection could not be established".to_string()));
        }
        if !connection.query(id, &query[2..]) {
            return Err(failed("probe query could not be queued".to_string()));
        }

        let deadline = Instant::now() + self.timeout;
        let result = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(remaining) {
                Ok(ProbeEvent::Response(response)) => match check_response(id, &response) {
                    // The probe is the only query on this connection.
                    Err(ProbeFailure::IdMismatch(other)) => {
                        debug!(server = %server, expected = id, got = other, "Ignoring unrelated response");
                    }
                    Err(ProbeFailure::Invalid(reason)) => break Err(failed(reason)),
                    Ok(()) => break Ok(()),
                },
                Ok(ProbeEvent::Closed) => {
                    break Err(failed("connection closed before a response".to_string()))
                }
                Err(_) => break Err(failed(format!("no response within {:?}", self.timeout))),
            }
        };

        drop(connection);

        match &result {
            Ok(()) => info!(server = %server, "DoT server validated"),
            Err(e) => warn!(server = %server, error = %e, "DoT server validation failed"),
        }
        result
    }
}

/// Builds a recursive A query for `<random>-dnsotls-ds.<domain>`.
pub fn build_probe(domain: &str) -> Result<(u16, Vec<u8>), DotError> {
    let invalid = |e: String| DotError::Validation {
        server: domain.to_string(),
        reason: e,
    };

    let qname = format!("{:016x}{}.{}", fastrand::u64(..), PROBE_LABEL_SUFFIX, domain);
    let name = Name::from_str(&qname).map_err(|e| invalid(format!("'{}': {}", qname, e)))?;

    let mut query = Query::new();
    query.set_name(name);
    query.set_query_type(RecordType::A);
    query.set_query_class(DNSClass::IN);

    let id = fastrand::u16(..);
    let mut message = Message::new(id, MessageType::Query, OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(query);

    let mut buf = Vec::with_capacity(64);
    let mut encoder = BinEncoder::new(&mut buf);
    message
        .emit(&mut encoder)
        .map_err(|e| invalid(e.to_string()))?;

    Ok((id, buf))
}

#[derive(Debug, PartialEq, Eq)]
enum ProbeFailure {
    IdMismatch(u16),
    Invalid(String),
}

fn check_response(id: u16, response: &[u8]) -> Result<(), ProbeFailure> {
    let message = Message::from_vec(response)
        .map_err(|e| ProbeFailure::Invalid(format!("unparsable response: {}", e)))?;

    if message.id() != id {
        return Err(ProbeFailure::IdMismatch(message.id()));
    }
    if message.message_type() != MessageType::Response {
        return Err(ProbeFailure::Invalid("reply is not a response".to_string()));
    }
    if message.response_code() != ResponseCode::NoError {
        return Err(ProbeFailure::Invalid(format!(
            "rcode {}",
            message.response_code()
        )));
    }
    if message.answers().is_empty() {
        return Err(ProbeFailure::Invalid("no answer records".to_string()));
    }
    Ok(())
}

enum ProbeEvent {
    Response(Bytes),
    Closed,
}

struct ProbeObserver {
    events: Sender<ProbeEvent>,
}

impl ProbeObserver {
    fn channel() -> (Arc<Self>, Receiver<ProbeEvent>) {
        let (tx, rx) = mpsc::channel();
        (
            Arc::new(Self { events: tx }),
            rx,
        )
    }

    fn send(&self, event: ProbeEvent) {
        // The validator may have given up already.
        let _ = self.events.send(event);
    }
}

impl ConnectionObserver for ProbeObserver {
    fn on_response(&self, response: Bytes) {
        self.send(ProbeEvent::Response(response));
    }

    fn on_closed(&self) {
        self.send(ProbeEvent::Closed);
    }
}
