//! Core orchestration engine for provision-kit.
//!
//! This crate drives multi-stage cloud deployments end to end: it
//! validates trigger parameters, reconciles provider resources
//! idempotently, supervises external CLI tools, classifies their output
//! into progress and artifacts, and streams ordered events to observers.
//!
//! Layering, bottom up:
//! - [`supervise`]: spawn external commands and stream their output lines
//! - [`classify`]: map raw output lines to stage/artifact/fatal signals
//! - [`reconcile`]: query-before-create resource reconciliation
//! - [`artifacts`]: per-run artifact capture and on-disk records
//! - [`plan`]: the canonical stage list for a target
//! - [`engine`]: the stage sequencer
//! - [`run`]: run lifecycle and event streams
//! - [`config`] / [`package`]: parameter resolution and package lookup

pub mod artifacts;
pub mod classify;
pub mod config;
pub mod engine;
pub mod package;
pub mod plan;
pub mod reconcile;
pub mod run;
pub mod supervise;
