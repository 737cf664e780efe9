//! Event distribution for chain lifecycle events.

pub mod bus;
