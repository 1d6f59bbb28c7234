//! Core constructs shared by every part of the OCMT relay: the domain data
//! model, Ed25519 key handling, the capability token codec and the signed
//! envelopes that ride alongside it, and the revocation Bloom filter.
//!
//! Everything in this crate is deliberately free of I/O; persistence and
//! transport live in `ocmt-storage` and `ocmt-relay` respectively.

pub mod authority;
pub mod bloom;
pub mod capability;
pub mod data;
pub mod time;
pub mod tracing;
