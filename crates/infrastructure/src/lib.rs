//! Ferrous DoT Infrastructure Layer
//!
//! The DNS-over-TLS connection engine and the pieces around it.

pub mod dns;
pub mod logging;

pub use dns::transport::tls::{ConnectionObserver, DotConnection, DotSessionCache, SessionCache};
pub use dns::validation::ServerValidator;
