//! Connection setup: trust anchors, client config, TCP connect and the TLS
//! handshake, all bounded by the server's connect timeout.
//!
//! Runs on the thread calling `initialize()`, inside the runtime that is later
//! handed to the I/O thread.

use ferrous_dot_domain::{DotError, DotServer, TrustAnchors};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::session_cache::SessionCache;
use super::socket;
use super::verifier::OpportunisticVerifier;

/// TLS 1.2 is the floor.
static PROTOCOL_VERSIONS: &[&rustls::SupportedProtocolVersion] =
    &[&rustls::version::TLS13, &rustls::version::TLS12];

/// Connects to `server` and completes the TLS handshake.
pub(crate) async fn establish(
    server: &DotServer,
    cache: &dyn SessionCache,
) -> Result<TlsStream<TcpStream>, DotError> {
    let config = client_config(server, cache)?;
    let server_name = server_name(server)?;

    if !server.is_strict() {
        warn!(server = %server, "No hostname configured, server certificate will not be verified");
    }

    let tcp = connect(server).await?;

    if cache.has_cached_session(&server_name) {
        debug!(server = %server, "Attempting TLS session resumption");
    }

    let connector = TlsConnector::from(config);
    let handshake = connector.connect_with(server_name, tcp, |connection| {
        cache.prepare_session(connection)
    });

    let stream = tokio::time::timeout(server.connect_timeout, handshake)
        .await
        .map_err(|_| DotError::HandshakeTimeout {
            server: server.to_string(),
        })?
        .map_err(|e| DotError::Handshake {
            server: server.to_string(),
            reason: e.to_string(),
        })?;

    let (_, session) = stream.get_ref();
    debug!(
        server = %server,
        version = ?session.protocol_version(),
        "DoT handshake complete"
    );
    Ok(stream)
}

async fn connect(server: &DotServer) -> Result<TcpStream, DotError> {
    let connect_error = |reason: String| DotError::Connect {
        server: server.to_string(),
        reason,
    };

    let std_stream = socket::start_connect(server)?;
    let stream = TcpStream::from_std(std_stream).map_err(|e| connect_error(e.to_string()))?;

    let connected = async {
        stream.writable().await?;
        match stream.take_error()? {
            Some(e) => Err(e),
            None => Ok(()),
        }
    };

    tokio::time::timeout(server.connect_timeout, connected)
        .await
        .map_err(|_| DotError::ConnectTimeout {
            server: server.to_string(),
        })?
        .map_err(|e| connect_error(e.to_string()))?;

    Ok(stream)
}

/// Client config for `server`, shared through `cache` with every other
/// connection to the same server.
pub(crate) fn client_config(
    server: &DotServer,
    cache: &dyn SessionCache,
) -> Result<Arc<ClientConfig>, DotError> {
    cache.client_config(server, &|| build_client_config(server))
}

fn build_client_config(server: &DotServer) -> Result<ClientConfig, DotError> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let roots = root_store(server)?;

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(|e| DotError::TlsConfig(e.to_string()))?;

    let config = if server.is_strict() {
        builder.with_root_certificates(roots).with_no_client_auth()
    } else {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(OpportunisticVerifier::new(provider)))
            .with_no_client_auth()
    };
    Ok(config)
}

/// SNI and verification name. Without a hostname the address is used, for
/// which rustls sends no SNI.
pub(crate) fn server_name(server: &DotServer) -> Result<ServerName<'static>, DotError> {
    match &server.hostname {
        Some(hostname) => ServerName::try_from(hostname.to_string())
            .map_err(|e| DotError::InvalidHostname(format!("{}: {}", hostname, e))),
        None => Ok(ServerName::IpAddress(server.addr.ip().into())),
    }
}

fn root_store(server: &DotServer) -> Result<RootCertStore, DotError> {
    let mut roots = RootCertStore::empty();

    if let Some(pem) = &server.certificate {
        warn!(server = %server, "Using pinned test certificate, unsafe for production");
        for cert in parse_pem(pem.as_bytes())
            .map_err(|e| DotError::InvalidCertificate(e.to_string()))?
        {
            roots
                .add(cert)
                .map_err(|e| DotError::InvalidCertificate(e.to_string()))?;
        }
        if roots.is_empty() {
            return Err(DotError::InvalidCertificate(
                "no certificate found in PEM data".to_string(),
            ));
        }
        return Ok(roots);
    }

    match &server.trust_anchors {
        TrustAnchors::Bundled => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        TrustAnchors::SystemDirectory(dir) => load_directory(&mut roots, dir)?,
    }
    Ok(roots)
}

fn load_directory(roots: &mut RootCertStore, dir: &Path) -> Result<(), DotError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| DotError::TrustAnchors(format!("{}: {}", dir.display(), e)))?;

    let mut certs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        // Unreadable or non-PEM files are common in CA directories.
        let Ok(data) = std::fs::read(&path) else {
            continue;
        };
        if let Ok(parsed) = parse_pem(&data) {
            certs.extend(parsed);
        }
    }

    let (added, ignored) = roots.add_parsable_certificates(certs);
    debug!(dir = %dir.display(), added, ignored, "Loaded CA certificates");
    if added == 0 {
        return Err(DotError::TrustAnchors(format!(
            "no usable CA certificate in {}",
            dir.display()
        )));
    }
    Ok(())
}

fn parse_pem(data: &[u8]) -> std::io::Result<Vec<CertificateDer<'static>>> {
    rustls_pemfile::certs(&mut BufReader::new(data)).collect()
}
