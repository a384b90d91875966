//! Event repository abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::DomainError;
use crate::event::DomainEvent;

/// Stored representation of a domain event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Aggregate this event belongs to.
    pub aggregate_id: String,
    /// Event type name for deserialization routing.
    pub event_type: String,
    /// Serialized event payload.
    pub payload: serde_json::Value,
    /// Sequence number within the aggregate stream.
    pub sequence_number: i64,
    /// Correlation ID for tracing.
    pub correlation_id: Uuid,
    /// Causation ID linking to the causing event/command.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Builds the stored form of a typed domain event.
    pub fn from_domain<E: DomainEvent>(event: &E) -> Self {
        let meta = event.metadata();
        Self {
            event_id: meta.event_id,
            aggregate_id: meta.aggregate_id.clone(),
            event_type: event.event_type().to_owned(),
            payload: event.to_payload(),
            sequence_number: meta.sequence_number,
            correlation_id: meta.correlation_id,
            causation_id: meta.causation_id,
            occurred_at: meta.occurred_at,
        }
    }
}

/// Repository trait for loading and appending domain events.
///
/// The log is append-only: implementations never reorder, update or delete
/// stored events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Load all events for a given aggregate in append order. Unknown
    /// aggregates yield an empty list.
    async fn load_events(&self, aggregate_id: &str) -> Result<Vec<StoredEvent>, DomainError>;

    /// Load the full log in append order.
    async fn all_events(&self) -> Result<Vec<StoredEvent>, DomainError>;

    /// Append events to the end of the log. Either every event in `events`
    /// becomes visible or none does.
    async fn append_events(
        &self,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> Result<(), DomainError>;
}
