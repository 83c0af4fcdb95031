mod errors;
mod logging;
mod root;
mod server;
mod tls;

pub use errors::ConfigError;
pub use logging::LoggingConfig;
pub use root::Config;
pub use server::ServerEntry;
pub use tls::TlsConfig;
