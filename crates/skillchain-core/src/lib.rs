//! Chain execution engine and repository trait definitions.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements, and the state machine that runs skill chains against
//! them. It depends only on `skillchain-types` -- never on
//! `skillchain-infra` or any database/IO crate.

pub mod chain;
pub mod engine;
pub mod event;
pub mod repository;
