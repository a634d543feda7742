//! Network Module
//!
//! TCP control channel and UDP discovery.
//!
//! ## Architecture
//! - Single acceptor thread polling a shutdown flag
//! - One thread per accepted connection; the engine decides which one
//!   owns the control channel
//! - Independent discovery thread driven by a ticker

mod connection;
mod discovery;
mod server;

pub use connection::{Connection, Fault, StreamWriter};
pub use discovery::DiscoveryEmitter;
pub use server::Server;
