//! Wire types for the OCMT relay's HTTP and WebSocket API, shared by the
//! server and the [client::RelayClient].

#[macro_use]
extern crate tracing;

pub mod client;
pub mod data;
pub mod route;

pub use client::RelayClient;
