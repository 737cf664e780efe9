//! Application state wiring the engine to its SQLite stores.
//!
//! `ChainEngine` is generic over its repositories; AppState pins it to the
//! concrete infra implementations. Shared by CLI commands and REST handlers.

use std::path::PathBuf;
use std::sync::Arc;

use skillchain_core::engine::ChainEngine;
use skillchain_core::event::bus::EventBus;
use skillchain_infra::config::{load_engine_config, resolve_data_dir};
use skillchain_infra::sqlite::chain::SqliteChainRepository;
use skillchain_infra::sqlite::execution::SqliteExecutionRepository;
use skillchain_infra::sqlite::pool::{DatabasePool, database_url};

/// Engine pinned to the SQLite repositories.
pub type ConcreteEngine = ChainEngine<SqliteChainRepository, SqliteExecutionRepository>;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Initialize from the resolved data directory.
    pub async fn init() -> anyhow::Result<Self> {
        Self::open(resolve_data_dir()).await
    }

    /// Connect to the database in `data_dir` and wire the engine.
    pub async fn open(data_dir: PathBuf) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = load_engine_config(&data_dir).await;
        let db_pool = DatabasePool::new(&database_url(&data_dir)).await?;

        let engine = ChainEngine::new(
            SqliteChainRepository::new(db_pool.clone()),
            SqliteExecutionRepository::new(db_pool),
            EventBus::new(config.event_capacity),
            config,
        );

        tracing::debug!(data_dir = %data_dir.display(), "application state initialized");

        Ok(Self {
            engine: Arc::new(engine),
            data_dir,
        })
    }
}
