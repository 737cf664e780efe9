//! Chain store and execution listing operations.
//!
//! Thin lookups shared by the CLI and the REST API. Chains are addressed by
//! a key that is either a chain id or a chain name.

use chrono::Utc;
use skillchain_types::chain::{ChainId, ChainRecord, ChainSummary};
use skillchain_types::error::EngineError;
use skillchain_types::execution::{Execution, ExecutionStatus};

use crate::chain::compile_chain;
use crate::repository::chain::ChainRepository;
use crate::repository::execution::ExecutionRepository;

use super::state_machine::ChainEngine;

impl<C: ChainRepository, E: ExecutionRepository> ChainEngine<C, E> {
    /// Validate and store a chain definition.
    ///
    /// A chain with the same name is replaced in place: it keeps its id and
    /// creation time. Executions already started keep their own snapshot.
    pub async fn import_chain(&self, mut record: ChainRecord) -> Result<ChainRecord, EngineError> {
        compile_chain(&record)?;

        if let Some(existing) = self.chains().get_chain_by_name(&record.name).await? {
            record.id = existing.id;
            record.created_at = existing.created_at;
        }
        record.updated_at = Utc::now();
        self.chains().save_chain(&record).await?;

        tracing::info!(
            chain_id = %record.id,
            chain = %record.name,
            links = record.links.len(),
            published = record.published,
            "chain imported"
        );
        Ok(record)
    }

    /// Look a chain up by id, falling back to its name.
    pub async fn find_chain(&self, key: &str) -> Result<ChainRecord, EngineError> {
        if let Ok(id) = key.parse::<ChainId>() {
            if let Some(chain) = self.chains().get_chain(&id).await? {
                return Ok(chain);
            }
        }
        self.chains()
            .get_chain_by_name(key)
            .await?
            .ok_or_else(|| EngineError::ChainNotFound(key.to_string()))
    }

    pub async fn set_chain_published(
        &self,
        key: &str,
        published: bool,
    ) -> Result<ChainRecord, EngineError> {
        let mut chain = self.find_chain(key).await?;
        if !self.chains().set_published(&chain.id, published).await? {
            return Err(EngineError::ChainNotFound(key.to_string()));
        }
        chain.published = published;

        tracing::info!(chain_id = %chain.id, chain = %chain.name, published, "chain publication changed");
        Ok(chain)
    }

    pub async fn list_chains(&self) -> Result<Vec<ChainSummary>, EngineError> {
        let chains = self.chains().list_chains().await?;
        Ok(chains.iter().map(ChainSummary::from).collect())
    }

    /// Newest executions first. `limit` falls back to the configured default.
    pub async fn list_executions(
        &self,
        chain_id: Option<&ChainId>,
        status: Option<ExecutionStatus>,
        limit: Option<u32>,
    ) -> Result<Vec<Execution>, EngineError> {
        let limit = limit.unwrap_or(self.config().default_list_limit);
        Ok(self
            .executions()
            .list_executions(chain_id, status, limit)
            .await?)
    }
}
