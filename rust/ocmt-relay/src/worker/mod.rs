//! Background workers that keep the relay's tables tidy.

mod sweep;

pub use sweep::*;
