//! Capability tokens and the signed envelopes that manage their lifecycle:
//! revocation requests and cached snapshot material.
//!
//! The relay verifies issuer signatures and expiry but never interprets
//! `resource` or `scope`; enforcing those is the destination container's job.

mod canonical;
mod revocation;
mod snapshot;
mod token;

pub use canonical::*;
pub use revocation::*;
pub use snapshot::*;
pub use token::*;
