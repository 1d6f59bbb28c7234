//! Axum extractors, used to create arguments in routes from a request.

mod authority;

pub use authority::*;
