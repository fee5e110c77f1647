//! Provisio: declarative, idempotent machine provisioning.
//!
//! An ordered list of steps, each guarded by an explicit idempotence check.
//! Re-running a list on a provisioned machine changes nothing.

pub mod cli;
pub mod core;
pub mod resources;
pub mod transport;
pub mod tripwire;
