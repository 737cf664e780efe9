//! In-memory repository doubles and fixtures for engine tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use skillchain_types::chain::{ChainId, ChainRecord, FailureKind, LinkRecord, SuccessKind};
use skillchain_types::config::EngineConfig;
use skillchain_types::error::RepositoryError;
use skillchain_types::execution::{
    ChainSnapshot, Checkpoint, Execution, ExecutionContext, ExecutionId, ExecutionStatus,
    LinkExecution, LinkOutcome,
};

use crate::event::bus::EventBus;
use crate::repository::chain::ChainRepository;
use crate::repository::execution::{ExecutionRepository, ExecutionWrite};

use super::ChainEngine;

// ---------------------------------------------------------------------------
// Chains
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct InMemoryChains {
    chains: Arc<Mutex<HashMap<ChainId, ChainRecord>>>,
}

impl ChainRepository for InMemoryChains {
    async fn save_chain(&self, chain: &ChainRecord) -> Result<(), RepositoryError> {
        self.chains.lock().unwrap().insert(chain.id, chain.clone());
        Ok(())
    }

    async fn get_chain(&self, id: &ChainId) -> Result<Option<ChainRecord>, RepositoryError> {
        Ok(self.chains.lock().unwrap().get(id).cloned())
    }

    async fn get_chain_by_name(&self, name: &str) -> Result<Option<ChainRecord>, RepositoryError> {
        Ok(self
            .chains
            .lock()
            .unwrap()
            .values()
            .find(|c| c.name == name)
            .cloned())
    }

    async fn list_chains(&self) -> Result<Vec<ChainRecord>, RepositoryError> {
        let mut chains: Vec<_> = self.chains.lock().unwrap().values().cloned().collect();
        chains.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(chains)
    }

    async fn set_published(&self, id: &ChainId, published: bool) -> Result<bool, RepositoryError> {
        match self.chains.lock().unwrap().get_mut(id) {
            Some(chain) => {
                chain.published = published;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Executions
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ExecutionState {
    executions: HashMap<ExecutionId, Execution>,
    attempts: Vec<LinkExecution>,
    checkpoints: Vec<Checkpoint>,
    /// Simulates another process committing right before the next write.
    interfere: bool,
}

/// Mirrors the SQLite adapter's semantics: a write is all-or-nothing and
/// only lands when the stored version matches.
#[derive(Clone, Default)]
pub struct InMemoryExecutions {
    state: Arc<Mutex<ExecutionState>>,
}

impl InMemoryExecutions {
    /// Make the next `apply_write` lose its version race.
    pub fn interfere_once(&self) {
        self.state.lock().unwrap().interfere = true;
    }
}

impl ExecutionRepository for InMemoryExecutions {
    async fn create_execution(
        &self,
        execution: &Execution,
        first_attempt: Option<&LinkExecution>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        if state.executions.contains_key(&execution.id) {
            return Err(RepositoryError::Conflict("execution exists".to_string()));
        }
        if let Some(attempt) = first_attempt {
            if state.attempts.iter().any(|a| a.id == attempt.id) {
                return Err(RepositoryError::Conflict("attempt exists".to_string()));
            }
            state.attempts.push(attempt.clone());
        }
        state.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.state.lock().unwrap().executions.get(id).cloned())
    }

    async fn list_executions(
        &self,
        chain_id: Option<&ChainId>,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let state = self.state.lock().unwrap();
        let mut executions: Vec<_> = state
            .executions
            .values()
            .filter(|e| chain_id.is_none_or(|c| e.chain_id == *c))
            .filter(|e| status.is_none_or(|s| e.status == s))
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions.truncate(limit as usize);
        Ok(executions)
    }

    async fn apply_write(&self, write: &ExecutionWrite) -> Result<(), RepositoryError> {
        let mut state = self.state.lock().unwrap();
        let id = write.execution.id;

        if std::mem::take(&mut state.interfere) {
            if let Some(stored) = state.executions.get_mut(&id) {
                stored.version += 1;
            }
        }

        let stored_version = state
            .executions
            .get(&id)
            .map(|e| e.version)
            .ok_or(RepositoryError::NotFound)?;
        if stored_version != write.expected_version {
            return Err(RepositoryError::Conflict(format!(
                "expected version {}, found {stored_version}",
                write.expected_version
            )));
        }

        if let Some(attempt) = &write.new_attempt {
            let duplicate = state.attempts.iter().any(|a| {
                a.execution_id == attempt.execution_id
                    && a.link_id == attempt.link_id
                    && a.attempt_number == attempt.attempt_number
            });
            if duplicate {
                return Err(RepositoryError::Conflict("duplicate attempt".to_string()));
            }
        }
        if let Some(fin) = &write.finalize_attempt {
            let attempt = state
                .attempts
                .iter_mut()
                .find(|a| a.id == fin.attempt_id && a.outcome == LinkOutcome::Pending)
                .ok_or_else(|| RepositoryError::Conflict("attempt already finalized".to_string()))?;
            attempt.outcome = fin.outcome;
            attempt.output = fin.output.clone();
            attempt.error = fin.error.clone();
            attempt.transition_taken = Some(fin.transition_taken.clone());
            attempt.finished_at = Some(fin.finished_at);
        }
        if let Some((attempt_id, at)) = write.mark_dispatched {
            if let Some(attempt) = state.attempts.iter_mut().find(|a| a.id == attempt_id) {
                attempt.dispatched_at = Some(at);
            }
        }
        if let Some(checkpoint) = &write.checkpoint {
            state.checkpoints.push(checkpoint.clone());
        }
        if let Some(attempt) = &write.new_attempt {
            state.attempts.push(attempt.clone());
        }
        state.executions.insert(id, write.execution.clone());
        Ok(())
    }

    async fn list_link_executions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<LinkExecution>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|a| a.execution_id == *execution_id)
            .cloned()
            .collect())
    }

    async fn list_checkpoints(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .checkpoints
            .iter()
            .filter(|c| c.execution_id == *execution_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn link(id: &str, position: u32) -> LinkRecord {
    LinkRecord {
        id: id.to_string(),
        name: id.to_uppercase(),
        position,
        skill: format!("{id}-skill"),
        agent: None,
        max_retries: 3,
        on_success_transition: SuccessKind::NextLink,
        on_success_target_link_id: None,
        on_failure_transition: FailureKind::Retry,
        on_failure_target_link_id: None,
        escalation_reason: None,
    }
}

pub fn chain(name: &str, max_total_failures: u32, links: Vec<LinkRecord>) -> ChainRecord {
    ChainRecord {
        id: ChainId::new(),
        name: name.to_string(),
        description: None,
        published: true,
        max_total_failures,
        links,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// A bare Pending execution, for repository-level tests.
pub fn pending_execution() -> Execution {
    let now = Utc::now();
    Execution {
        id: ExecutionId::new(),
        chain_id: ChainId::new(),
        status: ExecutionStatus::Pending,
        current_link_id: None,
        total_failure_count: 0,
        requires_human_intervention: false,
        intervention_reason: None,
        input_values: json!({}),
        execution_context: ExecutionContext::new(),
        error: None,
        started_by: None,
        completed_by: None,
        created_at: now,
        started_at: None,
        completed_at: None,
        updated_at: now,
        version: 0,
        chain: ChainSnapshot {
            chain_id: ChainId::new(),
            name: "fixture".to_string(),
            max_total_failures: 1,
            links: Vec::new(),
        },
    }
}

pub type TestEngine = ChainEngine<InMemoryChains, InMemoryExecutions>;

/// An engine over fresh in-memory stores with `chain` already saved.
pub async fn engine_with(chain: &ChainRecord) -> (TestEngine, InMemoryExecutions) {
    engine_with_config(chain, EngineConfig::default()).await
}

pub async fn engine_with_config(
    chain: &ChainRecord,
    config: EngineConfig,
) -> (TestEngine, InMemoryExecutions) {
    let chains = InMemoryChains::default();
    chains.save_chain(chain).await.unwrap();
    let executions = InMemoryExecutions::default();
    let engine = ChainEngine::new(chains, executions.clone(), EventBus::new(64), config);
    (engine, executions)
}
