//! # pv-protocol
//!
//! Core protocol definitions and data models for provision-kit.
//!
//! This crate defines all shared data structures used for:
//! - Deployment run and stage state
//! - Operator-supplied deployment parameters
//! - The Op/Event protocol between the remote observer and the core
//! - The persisted artifact record consumed by the packaging step
//!
//! ## Modules
//!
//! - [`stage_models`]: Stage status and per-stage state
//! - [`run_models`]: Run status, parameters, and artifact records
//! - [`ipc`]: Operations and Events for observer-core communication
//!
//! ## Design Principles
//!
//! - Minimal dependencies: only serde, ts-rs, uuid, and chrono
//! - TypeScript generation: all types derive `TS` for the web observer
//! - Independent compilation: no dependencies on other provision-kit crates

pub mod ipc;
pub mod run_models;
pub mod stage_models;

// Re-export all public types for convenience
pub use ipc::*;
pub use run_models::*;
pub use stage_models::*;
