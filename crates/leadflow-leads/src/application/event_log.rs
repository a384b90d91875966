//! The event log: persists lead events and dispatches reactions.
//!
//! Reactions are registered per event type. They run synchronously after the
//! append succeeded and receive the raw repository and queue, so events a
//! reaction appends are stored without dispatching further reactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use leadflow_core::error::DomainError;
use leadflow_core::repository::{EventRepository, StoredEvent};
use leadflow_core::task::{Task, TaskQueue};
use tracing::{debug, warn};

use crate::domain::events::LeadEventType;

/// What a reaction may touch. Appends made through `events` do not trigger
/// reactions.
pub struct ReactionContext<'a> {
    /// The underlying event repository.
    pub events: &'a dyn EventRepository,
    /// The task queue.
    pub tasks: &'a dyn TaskQueue,
}

/// A side effect triggered by an appended event.
#[async_trait]
pub trait Reaction: Send + Sync {
    /// Name used in logs and registry listings.
    fn name(&self) -> &'static str;

    /// Reacts to one stored event and returns the tasks it enqueued.
    async fn react(
        &self,
        event: &StoredEvent,
        ctx: &ReactionContext<'_>,
    ) -> Result<Vec<Task>, DomainError>;
}

/// Dispatch table from event type to the reactions it triggers.
#[derive(Default)]
pub struct ReactionRegistry {
    reactions: HashMap<LeadEventType, Vec<Arc<dyn Reaction>>>,
}

impl ReactionRegistry {
    /// Creates a registry with no reactions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `reaction` to run after every appended `event_type` event.
    #[must_use]
    pub fn with(mut self, event_type: LeadEventType, reaction: Arc<dyn Reaction>) -> Self {
        self.reactions.entry(event_type).or_default().push(reaction);
        self
    }

    /// Reactions registered for `event_type`, in registration order.
    #[must_use]
    pub fn reactions_for(&self, event_type: LeadEventType) -> &[Arc<dyn Reaction>] {
        self.reactions
            .get(&event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every registration as `(event type, reaction name)`, sorted by type.
    #[must_use]
    pub fn registered_types(&self) -> Vec<(LeadEventType, &'static str)> {
        let mut registrations: Vec<_> = self
            .reactions
            .iter()
            .flat_map(|(event_type, reactions)| {
                reactions.iter().map(move |reaction| (*event_type, reaction.name()))
            })
            .collect();
        registrations.sort_by_key(|(event_type, _)| *event_type);
        registrations
    }
}

/// Append/read surface over the event repository, with reaction dispatch.
pub struct EventLog {
    events: Arc<dyn EventRepository>,
    tasks: Arc<dyn TaskQueue>,
    reactions: ReactionRegistry,
}

impl EventLog {
    /// Creates an event log.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventRepository>,
        tasks: Arc<dyn TaskQueue>,
        reactions: ReactionRegistry,
    ) -> Self {
        Self {
            events,
            tasks,
            reactions,
        }
    }

    /// Persists `events`, then runs the reactions registered for each of
    /// them. Returns the tasks the reactions enqueued.
    ///
    /// # Errors
    ///
    /// Returns `DomainError` if the append fails, in which case no reaction
    /// runs, or if a reaction fails. In the latter case the events are
    /// already stored.
    pub async fn append(
        &self,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> Result<Vec<Task>, DomainError> {
        self.events.append_events(aggregate_id, events).await?;

        let ctx = ReactionContext {
            events: self.events.as_ref(),
            tasks: self.tasks.as_ref(),
        };
        let mut enqueued = Vec::new();
        for event in events {
            let Some(event_type) = LeadEventType::from_tag(&event.event_type) else {
                continue;
            };
            for reaction in self.reactions.reactions_for(event_type) {
                debug!(
                    reaction = reaction.name(),
                    event_id = %event.event_id,
                    %event_type,
                    "dispatching reaction"
                );
                let tasks = reaction.react(event, &ctx).await.inspect_err(|e| {
                    warn!(
                        reaction = reaction.name(),
                        event_id = %event.event_id,
                        error = %e,
                        "reaction failed after append"
                    );
                })?;
                enqueued.extend(tasks);
            }
        }
        Ok(enqueued)
    }

    /// Events of one aggregate in append order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the log cannot be read.
    pub async fn events_for(&self, aggregate_id: &str) -> Result<Vec<StoredEvent>, DomainError> {
        self.events.load_events(aggregate_id).await
    }

    /// The full log in append order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the log cannot be read.
    pub async fn all_events(&self) -> Result<Vec<StoredEvent>, DomainError> {
        self.events.all_events().await
    }

    /// The task queue reactions and command handlers enqueue work on.
    #[must_use]
    pub fn tasks(&self) -> &dyn TaskQueue {
        self.tasks.as_ref()
    }

    /// The underlying repository, for read-side queries.
    #[must_use]
    pub fn repository(&self) -> &dyn EventRepository {
        self.events.as_ref()
    }

    /// The reactions this log dispatches.
    #[must_use]
    pub fn reactions(&self) -> &ReactionRegistry {
        &self.reactions
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use chrono::{TimeZone, Utc};
    use leadflow_core::task::TaskKind;
    use leadflow_test_support::{
        FailingEventRepository, FixedClock, InMemoryEventRepository, InMemoryTaskQueue,
    };
    use uuid::Uuid;

    use crate::domain::events::{LEAD_CREATED_EVENT_TYPE, PAYMENT_REGISTERED_EVENT_TYPE};

    fn stored(aggregate_id: &str, event_type: &str) -> StoredEvent {
        StoredEvent {
            event_id: Uuid::new_v4(),
            aggregate_id: aggregate_id.to_owned(),
            event_type: event_type.to_owned(),
            payload: serde_json::json!({}),
            sequence_number: 1,
            correlation_id: Uuid::new_v4(),
            causation_id: Uuid::new_v4(),
            occurred_at: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        }
    }

    fn queue() -> Arc<InMemoryTaskQueue> {
        Arc::new(InMemoryTaskQueue::new(Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
        ))))
    }

    /// Records the events it saw and enqueues one task per event.
    #[derive(Default)]
    struct RecordingReaction {
        seen: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl Reaction for RecordingReaction {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn react(
            &self,
            event: &StoredEvent,
            ctx: &ReactionContext<'_>,
        ) -> Result<Vec<Task>, DomainError> {
            self.seen.lock().unwrap().push(event.event_id);
            let task = ctx
                .tasks
                .push(
                    TaskKind::SendAdConversion,
                    serde_json::json!({"lead_id": event.aggregate_id}),
                    std::time::Duration::ZERO,
                )
                .await?;
            Ok(vec![task])
        }
    }

    /// Appends another payment event through the context.
    struct EchoReaction;

    #[async_trait]
    impl Reaction for EchoReaction {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn react(
            &self,
            event: &StoredEvent,
            ctx: &ReactionContext<'_>,
        ) -> Result<Vec<Task>, DomainError> {
            let echo = stored(&event.aggregate_id, PAYMENT_REGISTERED_EVENT_TYPE);
            ctx.events.append_events(&event.aggregate_id, &[echo]).await?;
            Ok(vec![])
        }
    }

    struct BrokenReaction;

    #[async_trait]
    impl Reaction for BrokenReaction {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn react(
            &self,
            _event: &StoredEvent,
            _ctx: &ReactionContext<'_>,
        ) -> Result<Vec<Task>, DomainError> {
            Err(DomainError::Storage("queue unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_append_dispatches_only_registered_types() {
        // Arrange
        let reaction = Arc::new(RecordingReaction::default());
        let log = EventLog::new(
            Arc::new(InMemoryEventRepository::new()),
            queue(),
            ReactionRegistry::new().with(LeadEventType::PaymentRegistered, reaction.clone()),
        );
        let created = stored("lead_1", LEAD_CREATED_EVENT_TYPE);
        let paid = stored("lead_1", PAYMENT_REGISTERED_EVENT_TYPE);

        // Act
        let enqueued = log
            .append("lead_1", &[created, paid.clone()])
            .await
            .unwrap();

        // Assert
        assert_eq!(*reaction.seen.lock().unwrap(), vec![paid.event_id]);
        assert_eq!(enqueued.len(), 1);
        assert_eq!(log.tasks().tasks().await.unwrap(), enqueued);
        assert_eq!(log.events_for("lead_1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_event_types_are_stored_without_dispatch() {
        // Arrange
        let reaction = Arc::new(RecordingReaction::default());
        let log = EventLog::new(
            Arc::new(InMemoryEventRepository::new()),
            queue(),
            ReactionRegistry::new().with(LeadEventType::PaymentRegistered, reaction.clone()),
        );

        // Act
        let enqueued = log
            .append("lead_1", &[stored("lead_1", "lead.archived")])
            .await
            .unwrap();

        // Assert
        assert!(enqueued.is_empty());
        assert!(reaction.seen.lock().unwrap().is_empty());
        assert_eq!(log.all_events().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reaction_appends_do_not_dispatch_again() {
        // Arrange
        let log = EventLog::new(
            Arc::new(InMemoryEventRepository::new()),
            queue(),
            ReactionRegistry::new().with(LeadEventType::PaymentRegistered, Arc::new(EchoReaction)),
        );

        // Act
        log.append("lead_1", &[stored("lead_1", PAYMENT_REGISTERED_EVENT_TYPE)])
            .await
            .unwrap();

        // Assert
        assert_eq!(log.events_for("lead_1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_reaction_error_is_returned_after_event_is_stored() {
        // Arrange
        let log = EventLog::new(
            Arc::new(InMemoryEventRepository::new()),
            queue(),
            ReactionRegistry::new()
                .with(LeadEventType::PaymentRegistered, Arc::new(BrokenReaction)),
        );

        // Act
        let result = log
            .append("lead_1", &[stored("lead_1", PAYMENT_REGISTERED_EVENT_TYPE)])
            .await;

        // Assert
        assert!(matches!(result, Err(DomainError::Storage(_))));
        assert_eq!(log.events_for("lead_1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_append_runs_no_reaction() {
        // Arrange
        let reaction = Arc::new(RecordingReaction::default());
        let log = EventLog::new(
            Arc::new(FailingEventRepository),
            queue(),
            ReactionRegistry::new().with(LeadEventType::PaymentRegistered, reaction.clone()),
        );

        // Act
        let result = log
            .append("lead_1", &[stored("lead_1", PAYMENT_REGISTERED_EVENT_TYPE)])
            .await;

        // Assert
        assert!(matches!(result, Err(DomainError::Storage(_))));
        assert!(reaction.seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_registered_types_lists_every_registration() {
        let registry = ReactionRegistry::new()
            .with(LeadEventType::PaymentRegistered, Arc::new(BrokenReaction))
            .with(LeadEventType::LeadCreated, Arc::new(EchoReaction));

        assert_eq!(
            registry.registered_types(),
            vec![
                (LeadEventType::LeadCreated, "echo"),
                (LeadEventType::PaymentRegistered, "broken"),
            ]
        );
        assert!(registry.reactions_for(LeadEventType::LeadSentToCrm).is_empty());
    }
}
