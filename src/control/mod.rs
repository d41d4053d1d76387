//! WebSocket control channel.
//!
//! Clients connect to `/socket`, exchange JSON frames described in
//! [`protocol`], and are attached to session event streams as observers.

pub mod connection;
pub mod protocol;
pub mod server;
