//! Ferrous DoT Domain Layer
pub mod config;
pub mod dot_server;
pub mod errors;

pub use config::{Config, ConfigError, LoggingConfig, ServerEntry, TlsConfig};
pub use dot_server::{DotServer, TrustAnchors};
pub use errors::DotError;
