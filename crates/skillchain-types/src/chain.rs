//! Chain and link definition types.
//!
//! Two shapes exist for a link's transition rules:
//! - the flat record shape (`LinkRecord`), which mirrors how the definition
//!   store persists a link: a transition kind plus an optional target id;
//! - the tagged shape (`SuccessTransition` / `FailureTransition`), which the
//!   engine runs against. A `GoToLink` without a target cannot be expressed
//!   in the tagged shape, so conversion happens once, at chain load time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Unique identifier for a chain, wrapping a UUID v7 (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub Uuid);

impl ChainId {
    /// Create a new ChainId using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChainId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Stored definition (flat record shape)
// ---------------------------------------------------------------------------

/// A chain definition as held by the definition store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainRecord {
    /// UUIDv7 assigned on first save.
    #[serde(default)]
    pub id: ChainId,
    /// Human-readable chain name (unique in the store).
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Only published chains can be started.
    #[serde(default)]
    pub published: bool,
    /// Chain-wide failure budget before forced escalation.
    pub max_total_failures: u32,
    /// Link definitions; order in this list is not significant, `position` is.
    #[serde(default)]
    pub links: Vec<LinkRecord>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// A link definition in its stored, flat form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Link identifier, unique within the chain (e.g. "triage").
    pub id: String,
    /// Display name used in intervention reasons and listings.
    pub name: String,
    /// Position in the default ordering, starting at 0.
    pub position: u32,
    /// Skill reference handed to the link invoker.
    pub skill: String,
    /// Optional agent that should run the skill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Attempts allowed for this link before escalation is forced.
    pub max_retries: u32,
    pub on_success_transition: SuccessKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success_target_link_id: Option<String>,
    pub on_failure_transition: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure_target_link_id: Option<String>,
    /// Default intervention reason for an `Escalate` failure transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
}

/// Stored kind of a link's success transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessKind {
    NextLink,
    GoToLink,
    Complete,
}

/// Stored kind of a link's failure transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Retry,
    GoToLink,
    Escalate,
}

impl fmt::Display for SuccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuccessKind::NextLink => write!(f, "next_link"),
            SuccessKind::GoToLink => write!(f, "go_to_link"),
            SuccessKind::Complete => write!(f, "complete"),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Retry => write!(f, "retry"),
            FailureKind::GoToLink => write!(f, "go_to_link"),
            FailureKind::Escalate => write!(f, "escalate"),
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled definition (tagged shape)
// ---------------------------------------------------------------------------

/// What happens after a link succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum SuccessTransition {
    /// Continue with the link at `position + 1`; completes when there is none.
    NextLink,
    /// Jump to the given link id.
    GoToLink(String),
    /// Finish the execution.
    Complete,
}

/// What happens after a link fails (budgets permitting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "target", rename_all = "snake_case")]
pub enum FailureTransition {
    /// Run the same link again with the next attempt number.
    Retry,
    /// Jump to the given link id (fallback path or bounded loop).
    GoToLink(String),
    /// Pause for human intervention.
    Escalate,
}

/// A validated link the engine runs against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub name: String,
    pub position: u32,
    pub skill: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub max_retries: u32,
    pub on_success: SuccessTransition,
    pub on_failure: FailureTransition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
}

/// Summary row for chain listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSummary {
    pub id: ChainId,
    pub name: String,
    pub published: bool,
    pub link_count: usize,
    pub max_total_failures: u32,
    pub updated_at: DateTime<Utc>,
}

impl From<&ChainRecord> for ChainSummary {
    fn from(chain: &ChainRecord) -> Self {
        Self {
            id: chain.id,
            name: chain.name.clone(),
            published: chain.published,
            link_count: chain.links.len(),
            max_total_failures: chain.max_total_failures,
            updated_at: chain.updated_at,
        }
    }
}
