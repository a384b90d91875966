//! Test repositories: mock `EventRepository` implementations for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use leadflow_core::error::DomainError;
use leadflow_core::repository::{EventRepository, StoredEvent};

/// An event repository that records all `append_events` calls. Returns the
/// configured events from every `load_events` and `all_events` call and
/// always succeeds on `append_events`.
#[derive(Debug)]
pub struct RecordingEventRepository {
    load_result: Mutex<Vec<StoredEvent>>,
    appended: Mutex<Vec<(String, Vec<StoredEvent>)>>,
}

impl RecordingEventRepository {
    /// Create a new recording repository that will return `load_result` from
    /// every load call.
    #[must_use]
    pub fn new(load_result: Vec<StoredEvent>) -> Self {
        Self {
            load_result: Mutex::new(load_result),
            appended: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of all events that were appended.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn appended_events(&self) -> Vec<(String, Vec<StoredEvent>)> {
        self.appended.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventRepository for RecordingEventRepository {
    async fn load_events(&self, _aggregate_id: &str) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self.load_result.lock().unwrap().clone())
    }

    async fn all_events(&self) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self.load_result.lock().unwrap().clone())
    }

    async fn append_events(
        &self,
        aggregate_id: &str,
        events: &[StoredEvent],
    ) -> Result<(), DomainError> {
        self.appended
            .lock()
            .unwrap()
            .push((aggregate_id.to_owned(), events.to_vec()));
        Ok(())
    }
}

/// A working in-memory event log. Appended events are visible to later loads,
/// which makes it suitable for end-to-end tests of handlers and reactions.
#[derive(Debug, Default)]
pub struct InMemoryEventRepository {
    log: Mutex<Vec<StoredEvent>>,
}

impl InMemoryEventRepository {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log pre-seeded with `events` in the given order.
    #[must_use]
    pub fn with_events(events: Vec<StoredEvent>) -> Self {
        Self {
            log: Mutex::new(events),
        }
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn load_events(&self, aggregate_id: &str) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id)
            .cloned()
            .collect())
    }

    async fn all_events(&self) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(self.log.lock().unwrap().clone())
    }

    async fn append_events(
        &self,
        _aggregate_id: &str,
        events: &[StoredEvent],
    ) -> Result<(), DomainError> {
        self.log.lock().unwrap().extend_from_slice(events);
        Ok(())
    }
}

/// An event repository that always returns an empty event list and silently
/// accepts appends. Useful for testing "aggregate not found" scenarios and
/// creation commands.
#[derive(Debug)]
pub struct EmptyEventRepository;

#[async_trait]
impl EventRepository for EmptyEventRepository {
    async fn load_events(&self, _aggregate_id: &str) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn all_events(&self) -> Result<Vec<StoredEvent>, DomainError> {
        Ok(vec![])
    }

    async fn append_events(
        &self,
        _aggregate_id: &str,
        _events: &[StoredEvent],
    ) -> Result<(), DomainError> {
        Ok(())
    }
}

/// An event repository that always returns a storage error. Useful for
/// testing error-handling paths.
#[derive(Debug)]
pub struct FailingEventRepository;

#[async_trait]
impl EventRepository for FailingEventRepository {
    async fn load_events(&self, _aggregate_id: &str) -> Result<Vec<StoredEvent>, DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }

    async fn all_events(&self) -> Result<Vec<StoredEvent>, DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }

    async fn append_events(
        &self,
        _aggregate_id: &str,
        _events: &[StoredEvent],
    ) -> Result<(), DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }
}
