//! SQLite implementation of the `EventRepository` trait.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use leadflow_core::error::DomainError;
use leadflow_core::repository::{EventRepository, StoredEvent};

use crate::codec::{from_millis, parse_json, parse_uuid, storage_error, to_millis};

const EVENT_COLUMNS: &str = "event_id, aggregate_id, event_type, payload, sequence_number, \
                             correlation_id, causation_id, occurred_at";

/// SQLite-backed append-only event log.
#[derive(Debug, Clone)]
pub struct SqliteEventRepository {
    pool: SqlitePool,
}

impl SqliteEventRepository {
    /// Creates a new `SqliteEventRepository`.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn event_from_row(row: &SqliteRow) -> Result<StoredEvent, DomainError> {
    let event_id: String = row.try_get("event_id").map_err(storage_error)?;
    let payload: String = row.try_get("payload").map_err(storage_error)?;
    let correlation_id: String = row.try_get("correlation_id").map_err(storage_error)?;
    let causation_id: String = row.try_get("causation_id").map_err(storage_error)?;
    let occurred_at: i64 = row.try_get("occurred_at").map_err(storage_error)?;

    Ok(StoredEvent {
        event_id: parse_uuid(&event_id)?,
        aggregate_id: row.try_get("aggregate_id").map_err(storage_error)?,
        event_type: row.try_get("event_type").map_err(storage_error)?,
        payload: parse_json(&payload)?,
        sequence_number: row.try_get("sequence_number").map_err(storage_error)?,
        correlation_id: parse_uuid(&correlation_id)?,
        causation_id: parse_uuid(&causation_id)?,
        occurred_at: from_millis(occurred_at)?,
    })
}

#[async_trait]
impl EventRepository for SqliteEventRepository {
    async fn load_events(&self, aggregate_id: &str) -> Result<Vec<StoredEvent>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM domain_events WHERE aggregate_id = ? ORDER BY position"
        ))
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn all_events(&self) -> Result<Vec<StoredEvent>, DomainError> {
        let rows = sqlx::query(&format!(
            "SELECT {EVENT_COLUMNS} FROM domain_events ORDER BY position"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.iter().map(event_from_row).collect()
    }

    async fn append_events(
        &self,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> Result<(), DomainError> {
        if events.is_empty() {
            return Ok(());
        }

        if let Some(stray) = events.iter().find(|e| e.aggregate_id != aggregate_id) {
            return Err(DomainError::Validation(format!(
                "event {} belongs to {}, not {aggregate_id}",
                stray.event_id, stray.aggregate_id
            )));
        }

        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for event in events {
            sqlx::query(&format!(
                "INSERT INTO domain_events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
            ))
            .bind(event.event_id.to_string())
            .bind(&event.aggregate_id)
            .bind(&event.event_type)
            .bind(event.payload.to_string())
            .bind(event.sequence_number)
            .bind(event.correlation_id.to_string())
            .bind(event.causation_id.to_string())
            .bind(to_millis(event.occurred_at))
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)?;

        debug!(aggregate_id, count = events.len(), "appended events");
        Ok(())
    }
}
