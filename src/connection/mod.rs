//! Connections
//!
//! - [`ConnectionParameters`]: what to connect to
//! - [`ConnectionWrapper`]: a shared handle on an open connection and its tunnel
//! - [`ConnectionHandler`]: per-session bookkeeping on top of a wrapper

mod handler;
mod params;
mod wrapper;

pub use handler::ConnectionHandler;
pub use params::{ConnectionParameters, SslMode, SslOptions, TunnelKey, TunnelOptions};
pub use wrapper::ConnectionWrapper;
