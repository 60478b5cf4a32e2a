//! Curvebot Library
//!
//! Bonding-curve market making with a cross-market arbitrage loop on top.
//! The binary wires these modules together; tests use them directly.

pub mod arb;
pub mod config;
pub mod curve;
pub mod error;
pub mod events;
pub mod market;
pub mod math;

pub use error::{EngineError, Result};
