//! TCP front end of the broker.

pub mod listener;
pub mod session;

pub use listener::{Server, ServerConfig};
