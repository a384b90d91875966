//! Aggregate root abstraction.

use crate::event::DomainEvent;
use crate::repository::StoredEvent;

/// An aggregate whose state is a fold over its event stream.
pub trait AggregateRoot: Send + Sync {
    /// The event type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the stream the aggregate's events are appended to.
    fn aggregate_id(&self) -> &str;

    /// Returns the number of events folded so far, unknown types included.
    fn version(&self) -> i64;

    /// Folds one event into the state. Never fails and touches nothing
    /// outside the aggregate.
    fn apply(&mut self, event: &Self::Event);

    /// Returns events produced since the aggregate was loaded.
    fn uncommitted_events(&self) -> &[Self::Event];

    /// Removes and returns the uncommitted events.
    fn take_uncommitted_events(&mut self) -> Vec<Self::Event>;

    /// Removes the uncommitted events and returns them in stored form, ready
    /// to append.
    fn take_stored_events(&mut self) -> Vec<StoredEvent> {
        self.take_uncommitted_events()
            .iter()
            .map(StoredEvent::from_domain)
            .collect()
    }
}
