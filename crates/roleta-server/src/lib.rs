//! Roleta advisory server.
//!
//! Receives live spin outcomes over WebSocket, runs the per-spin
//! decision pipeline (force regression, Triple Rate Advisor, Martingale
//! tracking) and broadcasts betting suggestions to connected clients.
//! Every decision and its eventual outcome is recorded in a SQLite
//! decision log for offline analysis.

pub mod config;
pub mod gale_tracker;
pub mod pipeline;
pub mod repo;
pub mod server;
pub mod state;
pub mod trace;
