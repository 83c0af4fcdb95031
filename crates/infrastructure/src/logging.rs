use ferrous_dot_domain::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level when set, e.g.
/// `RUST_LOG=ferrous_dot_infrastructure::dns::transport::tls=trace` to follow
/// every I/O loop iteration. Calling this more than once is harmless.
pub fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .with_thread_names(true);

    if config.json {
        builder.json().try_init().ok();
    } else {
        builder.try_init().ok();
    }
}
