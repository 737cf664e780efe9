use thiserror::Error;

use crate::execution::{ExecutionId, ExecutionStatus};

/// Errors from repository operations (used by trait definitions in skillchain-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// A chain definition that cannot be run as stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("invalid chain name: {0}")]
    InvalidName(String),

    #[error("chain has no links")]
    NoLinks,

    #[error("duplicate link id '{0}'")]
    DuplicateLinkId(String),

    #[error("duplicate link position {0}")]
    DuplicatePosition(u32),

    #[error("link positions must be contiguous from 0: expected {expected}, found {found}")]
    NonContiguousPositions { expected: u32, found: u32 },

    #[error("link '{link_id}' has a go_to_link {transition} transition without a target")]
    MissingTarget { link_id: String, transition: String },

    #[error("link '{link_id}' targets unknown link '{target}'")]
    UnknownTarget { link_id: String, target: String },

    #[error("link '{link_id}' sets a {transition} target but its transition is not go_to_link")]
    UnexpectedTarget { link_id: String, transition: String },

    #[error("link '{0}' must allow at least one attempt (max_retries >= 1)")]
    InvalidRetryBudget(String),

    #[error("max_total_failures must be >= 1")]
    InvalidFailureBudget,

    #[error("parse error: {0}")]
    Parse(String),
}

/// Errors reported by the execution engine to its callers.
///
/// Invocation failures are never represented here: a failed skill call is a
/// `Failure` outcome handled by the transition resolver.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("chain not found: {0}")]
    ChainNotFound(String),

    #[error("chain '{0}' is not published")]
    ChainNotPublished(String),

    #[error("chain '{0}' has no links")]
    ChainEmpty(String),

    #[error("malformed chain definition: {0}")]
    Definition(#[from] DefinitionError),

    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("execution {0} was modified concurrently; reload and retry")]
    ConcurrentModification(ExecutionId),

    #[error("execution {0} has no pending attempt")]
    NoPendingAttempt(ExecutionId),

    #[error(
        "outcome for link '{actual_link}' attempt {actual_attempt} does not match the pending attempt (link '{expected_link}' attempt {expected_attempt})"
    )]
    AttemptMismatch {
        expected_link: String,
        expected_attempt: u32,
        actual_link: String,
        actual_attempt: u32,
    },

    #[error("execution is not awaiting intervention (status {status}, intervention flag {requires_human_intervention})")]
    NotPendingIntervention {
        status: ExecutionStatus,
        requires_human_intervention: bool,
    },

    #[error("execution {0} is awaiting intervention; use resume instead")]
    InterventionRequired(ExecutionId),

    #[error("cannot {operation} an execution in status {status}")]
    InvalidState {
        operation: &'static str,
        status: ExecutionStatus,
    },

    #[error("link '{0}' is not part of this chain")]
    UnknownLink(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        EngineError::Storage(e.to_string())
    }
}
