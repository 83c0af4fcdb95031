//! One persistent DNS-over-TLS connection to one server.
//!
//! `initialize()` handshakes on the calling thread, then hands the stream to a
//! dedicated `dot-io` thread. `query()` may be called from any thread; it only
//! queues a frame and wakes the loop. Dropping the connection shuts the loop
//! down and joins the thread.
//!
//! `initialize()` blocks on its own runtime and must not be called from
//! inside an async context.

use bytes::Bytes;
use ferrous_dot_domain::{DotError, DotServer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};
use std::thread::JoinHandle;
use tracing::{debug, error, warn};

use super::framer;
use super::handshake;
use super::io_loop;
use super::outbox::Outbox;
use super::session_cache::SessionCache;

/// Receives everything a connection produces. Both callbacks run on the
/// connection's I/O thread.
pub trait ConnectionObserver: Send + Sync {
    /// One response message, at most `MAX_RESPONSE_SIZE` bytes. Responses
    /// arrive in wire order and are not matched to queries.
    fn on_response(&self, response: Bytes);

    /// Called exactly once, after the last `on_response`.
    fn on_closed(&self);
}

enum State {
    Uninitialized,
    Failed,
    Running { worker: JoinHandle<()> },
    Dropped,
}

pub struct DotConnection {
    server: DotServer,
    cache: Arc<dyn SessionCache>,
    observer: Arc<dyn ConnectionObserver>,
    outbox: Arc<Outbox>,
    running: AtomicBool,
    state: Mutex<State>,
}

impl DotConnection {
    pub fn new(
        server: DotServer,
        cache: Arc<dyn SessionCache>,
        observer: Arc<dyn ConnectionObserver>,
    ) -> Self {
        Self {
            server,
            cache,
            observer,
            outbox: Arc::new(Outbox::new()),
            running: AtomicBool::new(false),
            state: Mutex::new(State::Uninitialized),
        }
    }

    pub fn server(&self) -> &DotServer {
        &self.server
    }

    /// Connects, handshakes and starts the I/O thread.
    ///
    /// Returns false on any failure, on a repeated call, or while another
    /// call is in progress. A connection that failed to initialize stays
    /// unusable.
    pub fn initialize(&self) -> bool {
        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                warn!(server = %self.server, "DoT initialize already in progress");
                return false;
            }
        };

        if !matches!(*state, State::Uninitialized) {
            warn!(server = %self.server, error = %DotError::AlreadyInitialized, "DoT initialize refused");
            return false;
        }

        match self.start() {
            Ok(worker) => {
                *state = State::Running { worker };
                self.running.store(true, Ordering::Release);
                true
            }
            Err(e) => {
                warn!(server = %self.server, error = %e, "DoT connection setup failed");
                *state = State::Failed;
                false
            }
        }
    }

    fn start(&self) -> Result<JoinHandle<()>, DotError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DotError::Runtime(e.to_string()))?;

        let stream = runtime.block_on(handshake::establish(&self.server, self.cache.as_ref()))?;

        let outbox = self.outbox.clone();
        let observer = self.observer.clone();
        let idle_timeout = self.server.idle_timeout;
        let label = self.server.to_string();

        std::thread::Builder::new()
            .name("dot-io".to_string())
            .spawn(move || {
                let reason =
                    runtime.block_on(io_loop::run(stream, outbox, observer, idle_timeout, &label));
                debug!(server = %label, ?reason, "DoT I/O thread exiting");
            })
            .map_err(|e| DotError::Runtime(e.to_string()))
    }

    /// Queues one query. Never blocks and never touches the socket.
    ///
    /// `body` is the DNS message without its leading transaction id; `id` is
    /// written in its place.
    ///
    /// Returns false before a successful `initialize()`, once the connection
    /// has closed, or when `body` is too large to frame.
    pub fn query(&self, id: u16, body: &[u8]) -> bool {
        if !self.running.load(Ordering::Acquire) {
            debug!(server = %self.server, error = %DotError::NotInitialized, "DoT query refused");
            return false;
        }

        let frame = match framer::encode_query(id, body) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(server = %self.server, error = %e, "DoT query refused");
                return false;
            }
        };

        self.outbox.push(frame)
    }
}

impl Drop for DotConnection {
    fn drop(&mut self) {
        // Queries racing this can only delay the stop: the loop acts on the
        // accumulated sum of a wake-up, which stays negative unless ~2^62
        // increments land in the same one.
        self.outbox.wake().shutdown();

        let state = std::mem::replace(
            self.state.get_mut().unwrap_or_else(PoisonError::into_inner),
            State::Dropped,
        );
        let State::Running { worker } = state else {
            return;
        };

        if worker.thread().id() == std::thread::current().id() {
            error!(
                server = %self.server,
                "DotConnection dropped from its own I/O thread, not joining"
            );
            return;
        }

        if worker.join().is_err() {
            error!(server = %self.server, "DoT I/O thread panicked");
        }
    }
}
