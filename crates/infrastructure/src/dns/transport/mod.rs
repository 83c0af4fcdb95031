pub mod tls;

pub use tls::{ConnectionObserver, DotConnection, DotSessionCache, SessionCache};
