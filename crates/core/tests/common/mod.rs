//! Shared helpers for the engine integration tests: fixtures for plans,
//! parameters, and run state, plus event-sequence assertions.
//!
//! Not every test binary uses every helper.
#![allow(dead_code)]

pub mod assertions;
pub mod fixtures;

#[allow(unused_imports)]
pub use assertions::*;
#[allow(unused_imports)]
pub use fixtures::*;
