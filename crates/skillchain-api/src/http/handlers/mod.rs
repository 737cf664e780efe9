//! HTTP request handlers for the REST API.

pub mod chain;
pub mod execution;
