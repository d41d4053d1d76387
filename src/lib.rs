#![forbid(unsafe_code)]

//! `craftplane`: control plane for provisioning and operating game-server
//! workers over a shared WebSocket channel.

pub mod config;
pub mod control;
pub mod driver;
pub mod errors;
pub mod models;
pub mod orchestrator;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
