//! Infrastructure layer for the skill chain engine.
//!
//! Contains implementations of the repository traits defined in
//! `skillchain-core` (SQLite storage) and the configuration loader.

pub mod config;
pub mod sqlite;
