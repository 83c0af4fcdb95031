pub mod transport;
pub mod validation;
