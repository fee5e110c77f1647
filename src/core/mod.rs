//! Core provisioning logic: types, parsing, resolution, planning, execution.

pub mod check;
pub mod error;
pub mod executor;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod runner;
pub mod state;
pub mod types;
