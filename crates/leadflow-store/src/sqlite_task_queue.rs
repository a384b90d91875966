//! SQLite implementation of the `TaskQueue` trait.
//!
//! Claims are a single conditional `UPDATE ... RETURNING`, so two pollers can
//! never claim the same row. Every later transition is guarded by
//! `status = 'processing'` and only takes effect on the claimed row.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};
use uuid::Uuid;

use leadflow_core::clock::{Clock, schedule_after};
use leadflow_core::error::DomainError;
use leadflow_core::task::{DEFAULT_MAX_ATTEMPTS, FailOutcome, Task, TaskKind, TaskQueue};

use crate::codec::{
    from_millis, parse_json, parse_uuid, storage_error, to_millis, to_millis_ceil,
};

const TASK_COLUMNS: &str = "task_id, kind, payload, status, created_at, execute_after, attempts, \
                            max_attempts, started_at, completed_at, result, error";

/// SQLite-backed durable task queue.
#[derive(Clone)]
pub struct SqliteTaskQueue {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl SqliteTaskQueue {
    /// Creates a queue whose tasks use the default retry ceiling.
    #[must_use]
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self::with_max_attempts(pool, clock, DEFAULT_MAX_ATTEMPTS)
    }

    /// Creates a queue whose tasks allow `max_attempts` claims.
    #[must_use]
    pub fn with_max_attempts(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        max_attempts: u32,
    ) -> Self {
        Self {
            pool,
            clock,
            max_attempts: max_attempts.max(1),
        }
    }
}

fn optional_millis(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, DomainError> {
    let raw: Option<i64> = row.try_get(column).map_err(storage_error)?;
    raw.map(from_millis).transpose()
}

fn count(row: &SqliteRow, column: &str) -> Result<u32, DomainError> {
    let raw: i64 = row.try_get(column).map_err(storage_error)?;
    u32::try_from(raw).map_err(|_| DomainError::Storage(format!("{column} out of range: {raw}")))
}

fn task_from_row(row: &SqliteRow) -> Result<Task, DomainError> {
    let task_id: String = row.try_get("task_id").map_err(storage_error)?;
    let kind: String = row.try_get("kind").map_err(storage_error)?;
    let payload: String = row.try_get("payload").map_err(storage_error)?;
    let status: String = row.try_get("status").map_err(storage_error)?;
    let created_at: i64 = row.try_get("created_at").map_err(storage_error)?;
    let execute_after: i64 = row.try_get("execute_after").map_err(storage_error)?;
    let result: Option<String> = row.try_get("result").map_err(storage_error)?;

    Ok(Task {
        id: parse_uuid(&task_id)?,
        kind: kind.parse()?,
        payload: parse_json(&payload)?,
        status: status.parse()?,
        created_at: from_millis(created_at)?,
        execute_after: from_millis(execute_after)?,
        attempts: count(row, "attempts")?,
        max_attempts: count(row, "max_attempts")?,
        started_at: optional_millis(row, "started_at")?,
        completed_at: optional_millis(row, "completed_at")?,
        result: result.as_deref().map(parse_json).transpose()?,
        error: row.try_get("error").map_err(storage_error)?,
    })
}

#[async_trait]
impl TaskQueue for SqliteTaskQueue {
    async fn push(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<Task, DomainError> {
        let now = self.clock.now();
        let task = Task::new(
            kind,
            payload,
            self.max_attempts,
            now,
            schedule_after(now, delay)?,
        );

        let row = sqlx::query(&format!(
            "INSERT INTO tasks (task_id, kind, payload, status, created_at, execute_after, \
             attempts, max_attempts) VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task.id.to_string())
        .bind(task.kind.as_str())
        .bind(task.payload.to_string())
        .bind(task.status.as_str())
        .bind(to_millis(task.created_at))
        .bind(to_millis_ceil(task.execute_after))
        .bind(i64::from(task.attempts))
        .bind(i64::from(task.max_attempts))
        .fetch_one(&self.pool)
        .await
        .map_err(storage_error)?;
        let stored = task_from_row(&row)?;

        debug!(
            task_id = %stored.id,
            kind = %stored.kind,
            execute_after = %stored.execute_after,
            "task pushed"
        );
        Ok(stored)
    }

    async fn pop(&self) -> Result<Option<Task>, DomainError> {
        let now = to_millis(self.clock.now());
        let row = sqlx::query(&format!(
            "UPDATE tasks \
             SET status = 'processing', started_at = ?1, attempts = attempts + 1 \
             WHERE position = ( \
                 SELECT position FROM tasks \
                 WHERE status = 'pending' AND execute_after <= ?1 AND attempts < max_attempts \
                 ORDER BY execute_after, position \
                 LIMIT 1 \
             ) AND status = 'pending' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn complete(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<Option<Task>, DomainError> {
        let now = to_millis(self.clock.now());
        let row = sqlx::query(&format!(
            "UPDATE tasks SET status = 'completed', completed_at = ?, result = ? \
             WHERE task_id = ? AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(now)
        .bind(result.to_string())
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        if row.is_none() {
            debug!(%task_id, "complete ignored: task is not processing");
        }
        row.as_ref().map(task_from_row).transpose()
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<Option<Task>, DomainError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ? AND status = 'processing'"
        ))
        .bind(task_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let Some(row) = row else {
            debug!(%task_id, "fail ignored: task is not processing");
            return Ok(None);
        };
        let mut task = task_from_row(&row)?;
        let outcome = task.fail(error, now)?;

        let updated = sqlx::query(&format!(
            "UPDATE tasks SET status = ?, execute_after = ?, error = ? \
             WHERE task_id = ? AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(task.status.as_str())
        .bind(to_millis_ceil(task.execute_after))
        .bind(error)
        .bind(task_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage_error)?;

        let Some(updated) = updated else {
            warn!(%task_id, "task left processing while its failure was recorded");
            return Ok(None);
        };
        let stored = task_from_row(&updated)?;
        tx.commit().await.map_err(storage_error)?;

        if outcome == FailOutcome::Exhausted {
            debug!(%task_id, attempts = stored.attempts, "task failed permanently");
        }
        Ok(Some(stored))
    }

    async fn abandon(&self, task_id: Uuid, error: &str) -> Result<Option<Task>, DomainError> {
        let row = sqlx::query(&format!(
            "UPDATE tasks SET status = 'failed', error = ? \
             WHERE task_id = ? AND status = 'processing' \
             RETURNING {TASK_COLUMNS}"
        ))
        .bind(error)
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<Task>, DomainError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE task_id = ?"))
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_error)?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn tasks(&self) -> Result<Vec<Task>, DomainError> {
        let rows = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks ORDER BY position"))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.iter().map(task_from_row).collect()
    }
}
