//! WebSocket transport.
//!
//! Thin adapter around the pipeline: the accept loop upgrades
//! connections, the connection manager arbitrates the master role, and
//! the message handler parses inbound frames, runs the pipeline and
//! broadcasts suggestions.

pub mod connection;
pub mod handler;
pub mod message;
pub mod ws;

pub use connection::{ConnectionManager, Role};
pub use handler::MessageHandler;
pub use ws::RoletaServer;
