//! Shared domain types for the skill chain execution engine.
//!
//! This crate contains the definitions the engine consumes (`ChainRecord`,
//! `LinkRecord` and their compiled transition variants), the runtime records
//! it produces (`Execution`, `LinkExecution`, `Checkpoint`), events, global
//! configuration, and the error enums shared across layers.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chain;
pub mod config;
pub mod error;
pub mod event;
pub mod execution;
