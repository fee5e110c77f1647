//! Tripwire: provenance event log and BLAKE3 step hashing.

pub mod eventlog;
pub mod hasher;
