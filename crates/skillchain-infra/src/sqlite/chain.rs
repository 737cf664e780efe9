//! SQLite chain repository implementation.
//!
//! Chain definitions are stored as JSON blobs; the `published` column is
//! authoritative and overrides the flag inside the blob on read.

use chrono::Utc;
use skillchain_core::repository::chain::ChainRepository;
use skillchain_types::chain::{ChainId, ChainRecord};
use skillchain_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, map_write_error, parse_json, to_json};

/// SQLite-backed implementation of `ChainRepository`.
#[derive(Clone)]
pub struct SqliteChainRepository {
    pool: DatabasePool,
}

impl SqliteChainRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct ChainRow {
    published: bool,
    definition: String,
}

impl ChainRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            published: row.try_get("published")?,
            definition: row.try_get("definition")?,
        })
    }

    fn into_chain(self) -> Result<ChainRecord, RepositoryError> {
        let mut chain: ChainRecord = parse_json(&self.definition, "chain definition")?;
        chain.published = self.published;
        Ok(chain)
    }
}

fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<ChainRecord, RepositoryError> {
    ChainRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_chain()
}

impl ChainRepository for SqliteChainRepository {
    async fn save_chain(&self, chain: &ChainRecord) -> Result<(), RepositoryError> {
        let definition = to_json(chain, "chain definition")?;

        sqlx::query(
            r#"INSERT INTO chains (id, name, published, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 published = excluded.published,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(chain.id.to_string())
        .bind(&chain.name)
        .bind(chain.published)
        .bind(&definition)
        .bind(format_datetime(&chain.created_at))
        .bind(format_datetime(&chain.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| map_write_error(e, || format!("chain name '{}' is taken", chain.name)))?;

        Ok(())
    }

    async fn get_chain(&self, id: &ChainId) -> Result<Option<ChainRecord>, RepositoryError> {
        let row = sqlx::query("SELECT published, definition FROM chains WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode).transpose()
    }

    async fn get_chain_by_name(&self, name: &str) -> Result<Option<ChainRecord>, RepositoryError> {
        let row = sqlx::query("SELECT published, definition FROM chains WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode).transpose()
    }

    async fn list_chains(&self) -> Result<Vec<ChainRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT published, definition FROM chains ORDER BY name")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode).collect()
    }

    async fn set_published(&self, id: &ChainId, published: bool) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE chains SET published = ?, updated_at = ? WHERE id = ?")
            .bind(published)
            .bind(format_datetime(&Utc::now()))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
