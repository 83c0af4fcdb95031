//! Live tests against public DNS-over-TLS resolvers.
//!
//! Run with `cargo test -p ferrous-dot-live -- --ignored`.

use bytes::Bytes;
use ferrous_dot_domain::{DotServer, TrustAnchors};
use ferrous_dot_infrastructure::{
    ConnectionObserver, DotConnection, DotSessionCache, ServerValidator,
};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

const RESOLVERS: &[(&str, &str)] = &[
    ("1.1.1.1:853", "cloudflare-dns.com"),
    ("8.8.8.8:853", "dns.google"),
    ("9.9.9.9:853", "dns.quad9.net"),
];

struct ChannelObserver {
    responses: Sender<Bytes>,
}

impl ConnectionObserver for ChannelObserver {
    fn on_response(&self, response: Bytes) {
        let _ = self.responses.send(response);
    }

    fn on_closed(&self) {}
}

fn resolver(addr: &str, hostname: &str) -> DotServer {
    DotServer::new(addr.parse().unwrap())
        .with_hostname(hostname)
        .with_trust_anchors(TrustAnchors::Bundled)
        .with_connect_timeout(Duration::from_secs(10))
}

fn connect(server: DotServer, cache: Arc<DotSessionCache>) -> (DotConnection, Receiver<Bytes>) {
    let (tx, rx) = mpsc::channel();
    let conn = DotConnection::new(server, cache, Arc::new(ChannelObserver { responses: tx }));
    (conn, rx)
}

/// `example.com IN A`, recursion desired, without the leading id.
fn example_com_query() -> Vec<u8> {
    let mut body = vec![0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    body.extend_from_slice(b"\x07example\x03com\x00");
    body.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    body
}

#[test]
#[ignore]
fn test_query_public_resolvers() {
    for (addr, hostname) in RESOLVERS {
        let (conn, responses) = connect(resolver(addr, hostname), Arc::default());
        assert!(conn.initialize(), "{} did not handshake", hostname);

        assert!(conn.query(0x1234, &example_com_query()));
        let response = responses
            .recv_timeout(Duration::from_secs(10))
            .unwrap_or_else(|_| panic!("{} did not answer", hostname));

        assert_eq!(&response[..2], &[0x12, 0x34], "{}", hostname);
        assert_eq!(response[3] & 0x0F, 0, "{} returned an error rcode", hostname);
    }
}

#[test]
#[ignore]
fn test_pipelined_queries() {
    let (addr, hostname) = RESOLVERS[0];
    let (conn, responses) = connect(resolver(addr, hostname), Arc::default());
    assert!(conn.initialize());

    for id in 1..=10u16 {
        assert!(conn.query(id, &example_com_query()));
    }

    let mut ids: Vec<u16> = (0..10)
        .map(|_| {
            let response = responses.recv_timeout(Duration::from_secs(10)).unwrap();
            u16::from_be_bytes([response[0], response[1]])
        })
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (1..=10).collect::<Vec<_>>());
}

#[test]
#[ignore]
fn test_validate_public_resolvers() {
    let cache = Arc::new(DotSessionCache::default());
    let validator = ServerValidator::new();

    for (addr, hostname) in RESOLVERS {
        validator
            .validate(&resolver(addr, hostname), cache.clone())
            .unwrap_or_else(|e| panic!("{}: {}", hostname, e));
    }
}
