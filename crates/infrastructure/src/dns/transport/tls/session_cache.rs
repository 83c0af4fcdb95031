//! TLS session resumption for DoT connections.
//!
//! rustls looks sessions up by server name on its own once a store is
//! installed in the client config, so the cache contract here is: hand out the
//! client config, optionally touch each new connection, and report whether a
//! session is available for a server.
//!
//! rustls only resumes a session under the verifier and client-auth resolver
//! it was stored with, so every connection to a server must share one
//! `ClientConfig`.

use ferrous_dot_domain::{DotError, DotServer, TlsConfig, TrustAnchors};
use lru::LruCache;
use rustls::client::{
    ClientSessionStore, Resumption, Tls12ClientSessionValue, Tls13ClientSessionValue,
};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, NamedGroup};
use std::collections::VecDeque;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DEFAULT_MAX_SERVERS: usize = 32;
pub const DEFAULT_TICKETS_PER_SERVER: usize = 5;

/// Reusable TLS session material, shared across connections to a server.
pub trait SessionCache: Send + Sync {
    /// Installs the resumption hook on a freshly built client config.
    fn prepare_config(&self, config: &mut ClientConfig);

    /// Client config for a connection to `server`. `build` produces a fresh
    /// config without the resumption hook.
    ///
    /// The default builds a new config every time. Caches that hold sessions
    /// must return the same config for the same server, or nothing they
    /// store is ever resumed.
    fn client_config(
        &self,
        _server: &DotServer,
        build: &dyn Fn() -> Result<ClientConfig, DotError>,
    ) -> Result<Arc<ClientConfig>, DotError> {
        let mut config = build()?;
        self.prepare_config(&mut config);
        Ok(Arc::new(config))
    }

    /// Runs on each new client connection before its first flight.
    fn prepare_session(&self, _connection: &mut ClientConnection) {}

    /// Whether a resumable session is held for `server_name`.
    fn has_cached_session(&self, server_name: &ServerName<'_>) -> bool;
}

/// Everything a client config depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ConfigKey {
    hostname: Option<Arc<str>>,
    certificate: Option<Arc<str>>,
    trust_anchors: TrustAnchors,
}

impl From<&DotServer> for ConfigKey {
    fn from(server: &DotServer) -> Self {
        Self {
            hostname: server.hostname.clone(),
            certificate: server.certificate.clone(),
            trust_anchors: server.trust_anchors.clone(),
        }
    }
}

/// In-memory [`SessionCache`] bounded per server and in number of servers.
#[derive(Clone)]
pub struct DotSessionCache {
    store: Arc<SessionStore>,
    configs: Arc<Mutex<LruCache<ConfigKey, Arc<ClientConfig>>>>,
}

impl DotSessionCache {
    pub fn new(max_servers: usize, tickets_per_server: usize) -> Self {
        let capacity = NonZeroUsize::new(max_servers).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: Arc::new(SessionStore {
                servers: Mutex::new(LruCache::new(capacity)),
                tickets_per_server: tickets_per_server.max(1),
            }),
            configs: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    fn configs(&self) -> MutexGuard<'_, LruCache<ConfigKey, Arc<ClientConfig>>> {
        self.configs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of servers with any remembered state.
    pub fn len(&self) -> usize {
        self.store.servers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forgets every session. Client configs are kept, so trust anchors
    /// loaded from disk stay as they were first read.
    pub fn clear(&self) {
        self.store.servers().clear();
    }
}

impl fmt::Debug for DotSessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DotSessionCache")
            .field("store", &self.store)
            .field("configs", &self.configs().len())
            .finish()
    }
}

impl Default for DotSessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SERVERS, DEFAULT_TICKETS_PER_SERVER)
    }
}

impl From<&TlsConfig> for DotSessionCache {
    fn from(config: &TlsConfig) -> Self {
        Self::new(config.session_cache_servers, config.session_cache_tickets)
    }
}

impl SessionCache for DotSessionCache {
    fn prepare_config(&self, config: &mut ClientConfig) {
        config.resumption = Resumption::store(self.store.clone());
    }

    fn client_config(
        &self,
        server: &DotServer,
        build: &dyn Fn() -> Result<ClientConfig, DotError>,
    ) -> Result<Arc<ClientConfig>, DotError> {
        let key = ConfigKey::from(server);
        if let Some(config) = self.configs().get(&key) {
            return Ok(config.clone());
        }

        // Built outside the lock: loading a CA directory reads from disk.
        let mut config = build()?;
        self.prepare_config(&mut config);
        let config = Arc::new(config);

        // A racing build for the same server loses to the one stored first.
        Ok(self
            .configs()
            .get_or_insert(key, || config)
            .clone())
    }

    fn has_cached_session(&self, server_name: &ServerName<'_>) -> bool {
        self.store
            .servers()
            .peek(&server_name.to_owned())
            .is_some_and(ServerSessions::is_resumable)
    }
}

#[derive(Default)]
struct ServerSessions {
    kx_hint: Option<NamedGroup>,
    tls12: Option<Tls12ClientSessionValue>,
    tls13: VecDeque<Tls13ClientSessionValue>,
}

impl ServerSessions {
    fn is_resumable(&self) -> bool {
        self.tls12.is_some() || !self.tls13.is_empty()
    }
}

struct SessionStore {
    servers: Mutex<LruCache<ServerName<'static>, ServerSessions>>,
    tickets_per_server: usize,
}

impl SessionStore {
    fn servers(&self) -> MutexGuard<'_, LruCache<ServerName<'static>, ServerSessions>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_entry<R>(
        &self,
        server_name: ServerName<'static>,
        f: impl FnOnce(&mut ServerSessions) -> R,
    ) -> R {
        let mut servers = self.servers();
        f(servers.get_or_insert_mut(server_name, ServerSessions::default))
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("servers", &self.servers().len())
            .field("tickets_per_server", &self.tickets_per_server)
            .finish()
    }
}

impl ClientSessionStore for SessionStore {
    fn set_kx_hint(&self, server_name: ServerName<'static>, group: NamedGroup) {
        self.with_entry(server_name, |entry| entry.kx_hint = Some(group));
    }

    fn kx_hint(&self, server_name: &ServerName<'_>) -> Option<NamedGroup> {
        self.servers()
            .get(&server_name.to_owned())
            .and_then(|entry| entry.kx_hint)
    }

    fn set_tls12_session(&self, server_name: ServerName<'static>, value: Tls12ClientSessionValue) {
        self.with_entry(server_name, |entry| entry.tls12 = Some(value));
    }

    fn tls12_session(&self, server_name: &ServerName<'_>) -> Option<Tls12ClientSessionValue> {
        self.servers()
            .get(&server_name.to_owned())
            .and_then(|entry| entry.tls12.clone())
    }

    fn remove_tls12_session(&self, server_name: &ServerName<'static>) {
        if let Some(entry) = self.servers().get_mut(server_name) {
            entry.tls12 = None;
        }
    }

    fn insert_tls13_ticket(&self, server_name: ServerName<'static>, value: Tls13ClientSessionValue) {
        let limit = self.tickets_per_server;
        self.with_entry(server_name, |entry| {
            if entry.tls13.len() == limit {
                entry.tls13.pop_front();
            }
            entry.tls13.push_back(value);
        });
    }

    fn take_tls13_ticket(
        &self,
        server_name: &ServerName<'static>,
    ) -> Option<Tls13ClientSessionValue> {
        self.servers()
            .get_mut(server_name)
            .and_then(|entry| entry.tls13.pop_back())
    }
}
