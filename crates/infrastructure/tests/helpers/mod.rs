#![allow(dead_code)]
pub mod builders;
pub mod dot_server_mock;

pub use builders::{a_query, Event, RecordingObserver};
pub use dot_server_mock::{MockDotServer, Reply, MOCK_HOSTNAME};
