//! Execution tracking types.
//!
//! An `Execution` is one run of a chain. Every attempt at a link is a
//! `LinkExecution` row, and every successful attempt appends a `Checkpoint`.
//! Both logs are append-only: an attempt row is written once when created
//! (outcome `Pending`) and finalized exactly once afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

use crate::chain::{ChainId, Link};

/// Unique identifier for an execution, wrapping a UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExecutionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Chain snapshot
// ---------------------------------------------------------------------------

/// The validated chain an execution runs against.
///
/// Captured at start so that edits to the stored definition never change the
/// semantics of a run already in flight. Links are sorted by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    pub chain_id: ChainId,
    pub name: String,
    pub max_total_failures: u32,
    pub links: Vec<Link>,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    /// Operator pause or escalation; the two are told apart by
    /// `Execution::requires_human_intervention`.
    Paused,
    Completed,
    /// Unrecoverable error, distinct from the normal failure/retry path.
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Completed, Failed and Cancelled accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Paused => "paused",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "paused" => Ok(ExecutionStatus::Paused),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("invalid execution status: '{other}'")),
        }
    }
}

/// One runtime run of a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub chain_id: ChainId,
    pub status: ExecutionStatus,
    /// Null only while Pending or once terminal.
    pub current_link_id: Option<String>,
    /// Cumulative failures across all links in this run. Never decremented.
    pub total_failure_count: u32,
    pub requires_human_intervention: bool,
    pub intervention_reason: Option<String>,
    /// Caller-supplied inputs, immutable after start.
    pub input_values: Value,
    /// Outputs accumulated from succeeded links.
    pub execution_context: ExecutionContext,
    /// Set only when the execution ends in `Failed`.
    pub error: Option<String>,
    pub started_by: Option<String>,
    pub completed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency token; bumped on every persisted change.
    pub version: i64,
    pub chain: ChainSnapshot,
}

impl Execution {
    /// Operator-initiated pause (not an escalation).
    pub fn is_operator_paused(&self) -> bool {
        self.status == ExecutionStatus::Paused && !self.requires_human_intervention
    }

    /// Paused by the engine (or by link policy) awaiting a human decision.
    pub fn is_awaiting_intervention(&self) -> bool {
        self.status == ExecutionStatus::Paused && self.requires_human_intervention
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// One output appended to the execution context after a success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub link_id: String,
    pub attempt_number: u32,
    pub output: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only accumulation of link outputs.
///
/// A link that succeeds more than once (loops via `GoToLink`) contributes
/// one entry per success; earlier entries are never replaced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    #[serde(default)]
    pub entries: Vec<ContextEntry>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: ContextEntry) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent output recorded for a link.
    pub fn latest_output(&self, link_id: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.link_id == link_id)
            .map(|e| &e.output)
    }

    /// The view handed to the link invoker:
    /// `{ "inputs": ..., "links": { "<link_id>": <latest output> } }`.
    pub fn invoker_view(&self, inputs: &Value) -> Value {
        let mut links = Map::new();
        for entry in &self.entries {
            links.insert(entry.link_id.clone(), entry.output.clone());
        }
        serde_json::json!({
            "inputs": inputs,
            "links": Value::Object(links),
        })
    }
}

// ---------------------------------------------------------------------------
// Link executions (attempts)
// ---------------------------------------------------------------------------

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Pending,
    Success,
    Failure,
    /// Closed without a result (execution cancelled or failed while the
    /// attempt was in flight).
    Skipped,
}

impl LinkOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkOutcome::Pending => "pending",
            LinkOutcome::Success => "success",
            LinkOutcome::Failure => "failure",
            LinkOutcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LinkOutcome::Pending),
            "success" => Ok(LinkOutcome::Success),
            "failure" => Ok(LinkOutcome::Failure),
            "skipped" => Ok(LinkOutcome::Skipped),
            other => Err(format!("invalid link outcome: '{other}'")),
        }
    }
}

/// Why an execution was escalated to a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationCause {
    /// The link used up its own `max_retries`.
    MaxRetriesExceeded,
    /// The chain-wide failure budget was used up.
    FailureBudgetExceeded,
    /// The link's failure transition is `Escalate`.
    LinkPolicy,
}

/// The transition the state machine took after an attempt, kept for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitionTaken {
    NextLink { target: String },
    GoToLink { target: String },
    Complete,
    Retry { next_attempt: u32 },
    Escalate { cause: EscalationCause },
    /// The attempt was closed because the execution was cancelled or failed.
    Abandoned,
}

impl fmt::Display for TransitionTaken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionTaken::NextLink { target } => write!(f, "next_link -> {target}"),
            TransitionTaken::GoToLink { target } => write!(f, "go_to_link -> {target}"),
            TransitionTaken::Complete => write!(f, "complete"),
            TransitionTaken::Retry { next_attempt } => write!(f, "retry (attempt {next_attempt})"),
            TransitionTaken::Escalate { cause } => write!(f, "escalate ({cause:?})"),
            TransitionTaken::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// One attempt of one link within one execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkExecution {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub link_id: String,
    /// 1-based, cumulative per (execution, link) across the whole run.
    pub attempt_number: u32,
    pub outcome: LinkOutcome,
    /// Snapshot of what the invoker was given.
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub transition_taken: Option<TransitionTaken>,
    /// When the attempt was handed to the invoker; `None` if it was created
    /// while the execution was operator-paused.
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Snapshot appended after every successful attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub execution_id: ExecutionId,
    pub link_id: String,
    pub position: u32,
    pub attempt_number: u32,
    /// The context entry this success appended.
    pub checkpoint_data: ContextEntry,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Invoker contract
// ---------------------------------------------------------------------------

/// Request for the link invoker to run one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub execution_id: ExecutionId,
    pub chain_id: ChainId,
    pub link_id: String,
    pub link_name: String,
    pub skill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub attempt_number: u32,
    pub input_values: Value,
    /// See `ExecutionContext::invoker_view`.
    pub context: Value,
}

/// What the invoker reports back for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub link_id: String,
    pub attempt_number: u32,
    #[serde(flatten)]
    pub outcome: ReportedOutcome,
}

/// Result of an invocation. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportedOutcome {
    Success {
        #[serde(default)]
        output: Value,
    },
    Failure {
        error: String,
        /// Overrides the default reason when the link escalates by policy.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        escalation_reason: Option<String>,
    },
}

impl OutcomeReport {
    pub fn success(link_id: impl Into<String>, attempt_number: u32, output: Value) -> Self {
        Self {
            link_id: link_id.into(),
            attempt_number,
            outcome: ReportedOutcome::Success { output },
        }
    }

    pub fn failure(link_id: impl Into<String>, attempt_number: u32, error: impl Into<String>) -> Self {
        Self {
            link_id: link_id.into(),
            attempt_number,
            outcome: ReportedOutcome::Failure {
                error: error.into(),
                escalation_reason: None,
            },
        }
    }
}

/// Operator decision that clears an intervention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Resolution {
    /// Fresh attempt at the current link (attempt numbering continues).
    Retry,
    /// Continue at an operator-chosen link.
    Skip { link_id: String },
    /// End the execution.
    Cancel,
}

/// Result of a state machine call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub execution: Execution,
    /// `false` when the call was accepted as a no-op (late report on a
    /// cancelled execution, repeated cancel, and so on).
    pub applied: bool,
    /// The attempt the invoker should run next, if any.
    pub dispatch: Option<DispatchRequest>,
}

impl Transition {
    /// A call that changed nothing.
    pub fn unchanged(execution: Execution) -> Self {
        Self {
            execution,
            applied: false,
            dispatch: None,
        }
    }
}
