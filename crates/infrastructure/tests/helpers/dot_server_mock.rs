#![allow(dead_code)]
use ferrous_dot_domain::DotServer;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{RData, Record};
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::ServerConfig;
use rustls::HandshakeKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

pub const MOCK_HOSTNAME: &str = "dns.example.test";

/// How the mock answers each query frame.
#[derive(Debug, Clone)]
pub enum Reply {
    /// A NOERROR response with one A record for the queried name.
    Answer,
    /// One response frame per listed size, each starting with the query id.
    Payloads(Vec<usize>),
    /// Read queries, never answer.
    Silent,
    /// Close the connection on the first query.
    Hangup,
}

#[derive(Default)]
struct Shared {
    frames: Mutex<Vec<Vec<u8>>>,
    handshakes: AtomicUsize,
    resumed: AtomicUsize,
}

/// DoT server on 127.0.0.1 with a fresh self-signed certificate, running on
/// its own thread so blocking client calls can be made from the test.
pub struct MockDotServer {
    addr: SocketAddr,
    certificate_pem: String,
    shared: Arc<Shared>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MockDotServer {
    pub fn start(reply: Reply) -> Self {
        let certified = rcgen::generate_simple_self_signed(vec![
            MOCK_HOSTNAME.to_string(),
            "localhost".to_string(),
        ])
        .unwrap();
        let certificate_pem = certified.cert.pem();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));
        let chain: Vec<CertificateDer<'static>> = vec![certified.cert.der().clone()];

        let config = ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let shared = Arc::new(Shared::default());
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let thread = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async move {
                    let listener = TcpListener::from_std(listener).unwrap();
                    loop {
                        tokio::select! {
                            _ = &mut shutdown_rx => break,
                            accepted = listener.accept() => {
                                if let Ok((tcp, _)) = accepted {
                                    tokio::spawn(serve(
                                        acceptor.clone(),
                                        tcp,
                                        shared.clone(),
                                        reply.clone(),
                                    ));
                                }
                            }
                        }
                    }
                });
            })
        };

        Self {
            addr,
            certificate_pem,
            shared,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn certificate_pem(&self) -> &str {
        &self.certificate_pem
    }

    /// Strictly verified identity pinned to this server's certificate.
    pub fn server(&self) -> DotServer {
        DotServer::new(self.addr)
            .with_hostname(MOCK_HOSTNAME)
            .with_certificate(self.certificate_pem.as_str())
            .with_tcp_fast_open(false)
            .with_connect_timeout(Duration::from_secs(5))
    }

    /// Complete query frames as received, length prefix included.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.shared.frames.lock().unwrap().clone()
    }

    pub fn wait_for_frames(&self, count: usize, timeout: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        loop {
            let frames = self.frames();
            if frames.len() >= count || Instant::now() >= deadline {
                return frames;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    pub fn handshakes(&self) -> usize {
        self.shared.handshakes.load(Ordering::SeqCst)
    }

    pub fn resumed_handshakes(&self) -> usize {
        self.shared.resumed.load(Ordering::SeqCst)
    }
}

impl Drop for MockDotServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

async fn serve(acceptor: TlsAcceptor, tcp: TcpStream, shared: Arc<Shared>, reply: Reply) {
    let Ok(mut tls) = acceptor.accept(tcp).await else {
        return;
    };
    shared.handshakes.fetch_add(1, Ordering::SeqCst);
    if tls.get_ref().1.handshake_kind() == Some(HandshakeKind::Resumed) {
        shared.resumed.fetch_add(1, Ordering::SeqCst);
    }

    loop {
        let mut header = [0u8; 2];
        if tls.read_exact(&mut header).await.is_err() {
            return;
        }
        let mut message = vec![0u8; u16::from_be_bytes(header) as usize];
        if tls.read_exact(&mut message).await.is_err() {
            return;
        }

        let mut frame = header.to_vec();
        frame.extend_from_slice(&message);
        shared.frames.lock().unwrap().push(frame);

        // The frame after the length prefix is a complete DNS message.
        let responses = match &reply {
            Reply::Answer => vec![answer(&message)],
            Reply::Payloads(sizes) => sizes
                .iter()
                .map(|size| {
                    let mut payload = vec![0xAB; *size];
                    payload[..2].copy_from_slice(&message[..2]);
                    payload
                })
                .collect(),
            Reply::Silent => continue,
            Reply::Hangup => {
                let _ = tls.shutdown().await;
                return;
            }
        };

        for response in responses {
            let mut out = (response.len() as u16).to_be_bytes().to_vec();
            out.extend_from_slice(&response);
            if tls.write_all(&out).await.is_err() || tls.flush().await.is_err() {
                return;
            }
        }
    }
}

fn answer(query: &[u8]) -> Vec<u8> {
    let query = Message::from_vec(query).unwrap();
    let mut response = Message::new(query.id(), MessageType::Response, OpCode::Query);
    response.set_response_code(ResponseCode::NoError);
    response.set_recursion_desired(true);
    response.set_recursion_available(true);
    for q in query.queries() {
        response.add_query(q.clone());
        response.add_answer(Record::from_rdata(
            q.name().clone(),
            60,
            RData::A(A(Ipv4Addr::new(192, 0, 2, 53))),
        ));
    }

    let mut buf = Vec::new();
    response.emit(&mut BinEncoder::new(&mut buf)).unwrap();
    buf
}
