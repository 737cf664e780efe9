//! Event types for the chain event bus.
//!
//! `ChainEvent` is broadcast by the engine on every lifecycle change. All
//! variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};

use crate::execution::{DispatchRequest, EscalationCause, ExecutionId};

/// Events emitted while executions progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// An execution was created and its first attempt dispatched.
    ExecutionStarted {
        execution_id: ExecutionId,
        chain_name: String,
        started_by: Option<String>,
    },

    /// An attempt was handed to the link invoker.
    LinkDispatched { request: DispatchRequest },

    /// An attempt succeeded and was checkpointed.
    LinkSucceeded {
        execution_id: ExecutionId,
        link_id: String,
        attempt_number: u32,
    },

    /// An attempt failed.
    LinkFailed {
        execution_id: ExecutionId,
        link_id: String,
        attempt_number: u32,
        error: String,
        total_failure_count: u32,
        will_retry: bool,
    },

    /// The execution now needs a human decision.
    ExecutionEscalated {
        execution_id: ExecutionId,
        link_id: String,
        cause: EscalationCause,
        reason: String,
    },

    /// An operator paused the execution.
    ExecutionPaused {
        execution_id: ExecutionId,
        actor: Option<String>,
    },

    /// The execution is running again after a pause or intervention.
    ExecutionResumed {
        execution_id: ExecutionId,
        link_id: String,
        actor: Option<String>,
    },

    ExecutionCompleted {
        execution_id: ExecutionId,
        links_succeeded: usize,
    },

    ExecutionCancelled {
        execution_id: ExecutionId,
        actor: Option<String>,
    },

    ExecutionFailed {
        execution_id: ExecutionId,
        error: String,
    },
}

impl ChainEvent {
    /// The execution an event belongs to.
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ChainEvent::LinkDispatched { request } => request.execution_id,
            ChainEvent::ExecutionStarted { execution_id, .. }
            | ChainEvent::LinkSucceeded { execution_id, .. }
            | ChainEvent::LinkFailed { execution_id, .. }
            | ChainEvent::ExecutionEscalated { execution_id, .. }
            | ChainEvent::ExecutionPaused { execution_id, .. }
            | ChainEvent::ExecutionResumed { execution_id, .. }
            | ChainEvent::ExecutionCompleted { execution_id, .. }
            | ChainEvent::ExecutionCancelled { execution_id, .. }
            | ChainEvent::ExecutionFailed { execution_id, .. } => *execution_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escalated_serde_roundtrip() {
        let id = ExecutionId::new();
        let event = ChainEvent::ExecutionEscalated {
            execution_id: id,
            link_id: "triage".to_string(),
            cause: EscalationCause::MaxRetriesExceeded,
            reason: "max retries exceeded on link Triage".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"execution_escalated\""));
        assert!(json.contains("\"cause\":\"max_retries_exceeded\""));
        let parsed: ChainEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.execution_id(), id);
    }

    #[test]
    fn test_link_failed_carries_counters() {
        let event = ChainEvent::LinkFailed {
            execution_id: ExecutionId::new(),
            link_id: "draft".to_string(),
            attempt_number: 2,
            error: "timeout".to_string(),
            total_failure_count: 4,
            will_retry: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "link_failed");
        assert_eq!(json["total_failure_count"], 4);
    }
}
