//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `skillchain-core`. Each
//! `ExecutionWrite` runs in one transaction on the writer pool: the
//! execution row update is a compare-and-swap on `version`, and the attempt
//! finalization only matches a row that is still pending. Either check
//! failing rolls back the whole write.

use skillchain_core::repository::execution::{ExecutionRepository, ExecutionWrite};
use skillchain_types::chain::ChainId;
use skillchain_types::error::RepositoryError;
use skillchain_types::execution::{
    Checkpoint, Execution, ExecutionId, ExecutionStatus, LinkExecution, LinkOutcome,
};
use sqlx::{Row, SqliteConnection};

use super::pool::DatabasePool;
use super::{format_datetime, map_write_error, parse_datetime, parse_json, parse_uuid, to_json};

/// SQLite-backed implementation of `ExecutionRepository`.
#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    chain_id: String,
    status: String,
    current_link_id: Option<String>,
    total_failure_count: i64,
    requires_human_intervention: bool,
    intervention_reason: Option<String>,
    input_values: String,
    execution_context: String,
    error: Option<String>,
    started_by: Option<String>,
    completed_by: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
    version: i64,
    chain_snapshot: String,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            chain_id: row.try_get("chain_id")?,
            status: row.try_get("status")?,
            current_link_id: row.try_get("current_link_id")?,
            total_failure_count: row.try_get("total_failure_count")?,
            requires_human_intervention: row.try_get("requires_human_intervention")?,
            intervention_reason: row.try_get("intervention_reason")?,
            input_values: row.try_get("input_values")?,
            execution_context: row.try_get("execution_context")?,
            error: row.try_get("error")?,
            started_by: row.try_get("started_by")?,
            completed_by: row.try_get("completed_by")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
            chain_snapshot: row.try_get("chain_snapshot")?,
        })
    }

    fn into_execution(self) -> Result<Execution, RepositoryError> {
        let status: ExecutionStatus = self.status.parse().map_err(RepositoryError::Query)?;

        Ok(Execution {
            id: ExecutionId(parse_uuid(&self.id)?),
            chain_id: ChainId(parse_uuid(&self.chain_id)?),
            status,
            current_link_id: self.current_link_id,
            total_failure_count: self.total_failure_count as u32,
            requires_human_intervention: self.requires_human_intervention,
            intervention_reason: self.intervention_reason,
            input_values: parse_json(&self.input_values, "input_values")?,
            execution_context: parse_json(&self.execution_context, "execution_context")?,
            error: self.error,
            started_by: self.started_by,
            completed_by: self.completed_by,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            updated_at: parse_datetime(&self.updated_at)?,
            version: self.version,
            chain: parse_json(&self.chain_snapshot, "chain_snapshot")?,
        })
    }
}

struct LinkExecutionRow {
    id: String,
    execution_id: String,
    link_id: String,
    attempt_number: i64,
    outcome: String,
    input: String,
    output: Option<String>,
    error: Option<String>,
    transition_taken: Option<String>,
    dispatched_at: Option<String>,
    created_at: String,
    finished_at: Option<String>,
}

impl LinkExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            link_id: row.try_get("link_id")?,
            attempt_number: row.try_get("attempt_number")?,
            outcome: row.try_get("outcome")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            transition_taken: row.try_get("transition_taken")?,
            dispatched_at: row.try_get("dispatched_at")?,
            created_at: row.try_get("created_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_link_execution(self) -> Result<LinkExecution, RepositoryError> {
        let outcome: LinkOutcome = self.outcome.parse().map_err(RepositoryError::Query)?;

        Ok(LinkExecution {
            id: parse_uuid(&self.id)?,
            execution_id: ExecutionId(parse_uuid(&self.execution_id)?),
            link_id: self.link_id,
            attempt_number: self.attempt_number as u32,
            outcome,
            input: parse_json(&self.input, "attempt input")?,
            output: self
                .output
                .as_deref()
                .map(|s| parse_json(s, "attempt output"))
                .transpose()?,
            error: self.error,
            transition_taken: self
                .transition_taken
                .as_deref()
                .map(|s| parse_json(s, "transition_taken"))
                .transpose()?,
            dispatched_at: self.dispatched_at.as_deref().map(parse_datetime).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            finished_at: self.finished_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

fn decode_execution(row: &sqlx::sqlite::SqliteRow) -> Result<Execution, RepositoryError> {
    ExecutionRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_execution()
}

fn decode_link_execution(row: &sqlx::sqlite::SqliteRow) -> Result<LinkExecution, RepositoryError> {
    LinkExecutionRow::from_row(row)
        .map_err(|e| RepositoryError::Query(e.to_string()))?
        .into_link_execution()
}

fn decode_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, RepositoryError> {
    let get = |e: sqlx::Error| RepositoryError::Query(e.to_string());
    let id: String = row.try_get("id").map_err(get)?;
    let execution_id: String = row.try_get("execution_id").map_err(get)?;
    let position: i64 = row.try_get("position").map_err(get)?;
    let attempt_number: i64 = row.try_get("attempt_number").map_err(get)?;
    let data: String = row.try_get("checkpoint_data").map_err(get)?;
    let created_at: String = row.try_get("created_at").map_err(get)?;

    Ok(Checkpoint {
        id: parse_uuid(&id)?,
        execution_id: ExecutionId(parse_uuid(&execution_id)?),
        link_id: row.try_get("link_id").map_err(get)?,
        position: position as u32,
        attempt_number: attempt_number as u32,
        checkpoint_data: parse_json(&data, "checkpoint_data")?,
        created_at: parse_datetime(&created_at)?,
    })
}

/// Insert a pending attempt inside an open transaction.
async fn insert_attempt(
    conn: &mut SqliteConnection,
    execution_id: &str,
    attempt: &LinkExecution,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r#"INSERT INTO link_executions
             (id, execution_id, link_id, attempt_number, outcome, input, output, error,
              transition_taken, dispatched_at, created_at, finished_at)
           VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?, ?, NULL)"#,
    )
    .bind(attempt.id.to_string())
    .bind(execution_id)
    .bind(&attempt.link_id)
    .bind(attempt.attempt_number as i64)
    .bind(attempt.outcome.as_str())
    .bind(to_json(&attempt.input, "attempt input")?)
    .bind(attempt.dispatched_at.as_ref().map(format_datetime))
    .bind(format_datetime(&attempt.created_at))
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        map_write_error(e, || {
            format!(
                "attempt {} of link '{}' already exists",
                attempt.attempt_number, attempt.link_id
            )
        })
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(
        &self,
        execution: &Execution,
        first_attempt: Option<&LinkExecution>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO executions (id, chain_id, status, current_link_id, total_failure_count,
                   requires_human_intervention, intervention_reason, input_values,
                   execution_context, error, started_by, completed_by, created_at, started_at,
                   completed_at, updated_at, version, chain_snapshot)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(execution.id.to_string())
        .bind(execution.chain_id.to_string())
        .bind(execution.status.as_str())
        .bind(&execution.current_link_id)
        .bind(execution.total_failure_count as i64)
        .bind(execution.requires_human_intervention)
        .bind(&execution.intervention_reason)
        .bind(to_json(&execution.input_values, "input_values")?)
        .bind(to_json(&execution.execution_context, "execution_context")?)
        .bind(&execution.error)
        .bind(&execution.started_by)
        .bind(&execution.completed_by)
        .bind(format_datetime(&execution.created_at))
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(format_datetime(&execution.updated_at))
        .bind(execution.version)
        .bind(to_json(&execution.chain, "chain_snapshot")?)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, || format!("execution {} already exists", execution.id)))?;

        if let Some(attempt) = first_attempt {
            insert_attempt(&mut tx, &execution.id.to_string(), attempt).await?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_execution(&self, id: &ExecutionId) -> Result<Option<Execution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode_execution).transpose()
    }

    async fn list_executions(
        &self,
        chain_id: Option<&ChainId>,
        status: Option<ExecutionStatus>,
        limit: u32,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let chain_id = chain_id.map(|c| c.to_string());
        let status = status.map(|s| s.as_str());

        // UUIDv7 ids sort by creation time.
        let rows = sqlx::query(
            r#"SELECT * FROM executions
               WHERE (?1 IS NULL OR chain_id = ?1)
                 AND (?2 IS NULL OR status = ?2)
               ORDER BY id DESC
               LIMIT ?3"#,
        )
        .bind(&chain_id)
        .bind(status)
        .bind(limit as i64)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode_execution).collect()
    }

    async fn apply_write(&self, write: &ExecutionWrite) -> Result<(), RepositoryError> {
        let execution = &write.execution;
        let execution_id = execution.id.to_string();

        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let updated = sqlx::query(
            r#"UPDATE executions SET
                 status = ?, current_link_id = ?, total_failure_count = ?,
                 requires_human_intervention = ?, intervention_reason = ?,
                 execution_context = ?, error = ?, completed_by = ?, started_at = ?,
                 completed_at = ?, updated_at = ?, version = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(execution.status.as_str())
        .bind(&execution.current_link_id)
        .bind(execution.total_failure_count as i64)
        .bind(execution.requires_human_intervention)
        .bind(&execution.intervention_reason)
        .bind(to_json(&execution.execution_context, "execution_context")?)
        .bind(&execution.error)
        .bind(&execution.completed_by)
        .bind(execution.started_at.as_ref().map(format_datetime))
        .bind(execution.completed_at.as_ref().map(format_datetime))
        .bind(format_datetime(&execution.updated_at))
        .bind(execution.version)
        .bind(&execution_id)
        .bind(write.expected_version)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::Conflict(format!(
                "execution {execution_id} is no longer at version {}",
                write.expected_version
            )));
        }

        if let Some(fin) = &write.finalize_attempt {
            let output = fin
                .output
                .as_ref()
                .map(|o| to_json(o, "attempt output"))
                .transpose()?;
            let finalized = sqlx::query(
                r#"UPDATE link_executions SET
                     outcome = ?, output = ?, error = ?, transition_taken = ?, finished_at = ?
                   WHERE id = ? AND outcome = 'pending'"#,
            )
            .bind(fin.outcome.as_str())
            .bind(output)
            .bind(&fin.error)
            .bind(to_json(&fin.transition_taken, "transition_taken")?)
            .bind(format_datetime(&fin.finished_at))
            .bind(fin.attempt_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

            if finalized.rows_affected() == 0 {
                return Err(RepositoryError::Conflict(format!(
                    "attempt {} is not pending",
                    fin.attempt_id
                )));
            }
        }

        if let Some((attempt_id, at)) = &write.mark_dispatched {
            sqlx::query("UPDATE link_executions SET dispatched_at = ? WHERE id = ?")
                .bind(format_datetime(at))
                .bind(attempt_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        if let Some(checkpoint) = &write.checkpoint {
            sqlx::query(
                r#"INSERT INTO execution_checkpoints
                     (id, execution_id, link_id, position, attempt_number, checkpoint_data, created_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(checkpoint.id.to_string())
            .bind(&execution_id)
            .bind(&checkpoint.link_id)
            .bind(checkpoint.position as i64)
            .bind(checkpoint.attempt_number as i64)
            .bind(to_json(&checkpoint.checkpoint_data, "checkpoint_data")?)
            .bind(format_datetime(&checkpoint.created_at))
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        if let Some(attempt) = &write.new_attempt {
            insert_attempt(&mut tx, &execution_id, attempt).await?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(
            execution_id = %execution_id,
            version = execution.version,
            status = %execution.status,
            "persisted execution transition"
        );

        Ok(())
    }

    async fn list_link_executions(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<LinkExecution>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM link_executions WHERE execution_id = ? ORDER BY rowid")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode_link_execution).collect()
    }

    async fn list_checkpoints(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Vec<Checkpoint>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM execution_checkpoints WHERE execution_id = ? ORDER BY rowid",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode_checkpoint).collect()
    }
}
