//! Session orchestration modules.
//!
//! Covers serialized artifact acquisition, identity derivation, the
//! session registry, event fan-out, and worker process supervision.

pub mod acquisition;
pub mod fanout;
pub mod identity;
pub mod registry;
pub mod supervisor;
