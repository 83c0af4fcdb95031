//! DNS-over-TLS transport (RFC 7858): one long-lived connection per
//! [`DotConnection`], with queries multiplexed over it by a dedicated I/O
//! thread.

pub mod connection;
pub mod framer;
mod handshake;
mod io_loop;
mod outbox;
pub mod session_cache;
mod socket;
mod verifier;
mod wake;

pub use connection::{ConnectionObserver, DotConnection};
pub use framer::{
    decode_length, decode_query, encode_query, ResponseDecoder, MAX_QUERY_BODY,
    MAX_RESPONSE_SIZE,
};
pub use session_cache::{DotSessionCache, SessionCache};
