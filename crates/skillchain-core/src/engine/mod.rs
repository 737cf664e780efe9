//! Skill chain execution engine.
//!
//! - `state_machine`: `ChainEngine`, the only component that mutates
//!   execution state (`start`, `record_outcome`)
//! - `control`: operator commands (pause, unpause, resume, cancel, fail)
//! - `catalog`: chain import, publication and listings
//! - `transition`: pure resolution of success/failure transitions
//! - `checkpoint`: checkpoint log access and context reconstruction
//! - `locks`: per-execution serialization
//! - `invoker`: the `LinkInvoker` seam and a driver loop over it

pub mod catalog;
pub mod checkpoint;
pub mod control;
pub mod invoker;
pub mod locks;
pub mod state_machine;
pub mod transition;

#[cfg(test)]
pub(crate) mod test_support;

pub use checkpoint::{CheckpointError, CheckpointManager};
pub use invoker::{ChainDriver, LinkInvoker};
pub use state_machine::ChainEngine;
