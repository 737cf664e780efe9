//! Execution repository trait definition.
//!
//! Covers the three runtime entity families:
//! - **Executions:** one mutable row per run, guarded by an optimistic
//!   `version` column.
//! - **Link executions:** one row per attempt, finalized exactly once.
//! - **Checkpoints:** append-only success snapshots.
//!
//! Every state machine step is persisted as a single [`ExecutionWrite`] so
//! that all rows produced by one transition land atomically.

use chrono::{DateTime, Utc};
use serde_json::Value;
use skillchain_types::chain::ChainId;
use skillchain_types::error::RepositoryError;
use skillchain_types::execution::{
    Checkpoint, Execution, ExecutionId, ExecutionStatus, LinkExecution, LinkOutcome,
    TransitionTaken,
};
use uuid::Uuid;

/// Closes the pending attempt with its final outcome.
#[derive(Debug, Clone)]
pub struct AttemptFinalization {
    pub attempt_id: Uuid,
    pub outcome: LinkOutcome,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub transition_taken: TransitionTaken,
    pub finished_at: DateTime<Utc>,
}

/// Everything one state machine step writes.
///
/// Implementations must apply the write atomically and only if the stored
/// execution's version still equals `expected_version`; otherwise nothing is
/// written and `RepositoryError::Conflict` is returned. Finalizing an attempt
/// that is no longer pending is a conflict as well.
#[derive(Debug, Clone)]
pub struct ExecutionWrite {
    /// The new execution state. Its `version` must be `expected_version + 1`.
    pub execution: Execution,
    pub expected_version: i64,
    pub finalize_attempt: Option<AttemptFinalization>,
    pub checkpoint: Option<Checkpoint>,
    pub new_attempt: Option<LinkExecution>,
    /// Stamp `dispatched_at` on an existing pending attempt.
    pub mark_dispatched: Option<(Uuid, DateTime<Utc>)>,
}

impl ExecutionWrite {
    /// A write that only replaces the execution row.
    pub fn execution_only(execution: Execution, expected_version: i64) -> Self {
        Self {
            execution,
            expected_version,
            finalize_attempt: None,
            checkpoint: None,
            new_attempt: None,
            mark_dispatched: None,
        }
    }
}

/// Repository trait for execution persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution row, together with its first attempt when one
    /// is given. Both rows land in one transaction or neither does.
    fn create_execution(
        &self,
        execution: &Execution,
        first_attempt: Option<&LinkExecution>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get an execution by its UUID.
    fn get_execution(
        &self,
        id: &ExecutionId,
    ) -> impl std::future::Future<Output = Result<Option<Execution>, RepositoryError>> + Send;

    /// List executions, newest first, optionally filtered by chain and status.
    fn list_executions(
        &self,
        chain_id: Option<&ChainId>,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<Execution>, RepositoryError>> + Send;

    /// Apply one transition atomically with an optimistic version check.
    fn apply_write(
        &self,
        write: &ExecutionWrite,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All attempts of an execution in creation order.
    fn list_link_executions(
        &self,
        execution_id: &ExecutionId,
    ) -> impl std::future::Future<Output = Result<Vec<LinkExecution>, RepositoryError>> + Send;

    /// All checkpoints of an execution in creation order.
    fn list_checkpoints(
        &self,
        execution_id: &ExecutionId,
    ) -> impl std::future::Future<Output = Result<Vec<Checkpoint>, RepositoryError>> + Send;
}
