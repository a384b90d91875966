//! Test queues: `TaskQueue` implementations for worker and handler tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use leadflow_core::clock::{Clock, schedule_after};
use leadflow_core::error::DomainError;
use leadflow_core::task::{DEFAULT_MAX_ATTEMPTS, Task, TaskKind, TaskQueue, TaskStatus};
use uuid::Uuid;

/// A fully working queue held in memory. Follows the same claim order as the
/// durable queue: earliest `execute_after` first, then insertion order.
pub struct InMemoryTaskQueue {
    tasks: Mutex<Vec<Task>>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
}

impl InMemoryTaskQueue {
    /// Create an empty queue using the default retry ceiling.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_max_attempts(clock, DEFAULT_MAX_ATTEMPTS)
    }

    /// Create an empty queue whose tasks allow `max_attempts` claims.
    #[must_use]
    pub fn with_max_attempts(clock: Arc<dyn Clock>, max_attempts: u32) -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            clock,
            max_attempts,
        }
    }

    fn transition<F>(&self, task_id: Uuid, apply: F) -> Option<Task>
    where
        F: FnOnce(&mut Task) -> Result<(), DomainError>,
    {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks.iter_mut().find(|t| t.id == task_id)?;
        if task.status != TaskStatus::Processing {
            return None;
        }
        apply(task).ok()?;
        Some(task.clone())
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
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
        self.tasks.lock().unwrap().push(task.clone());
        Ok(task)
    }

    async fn pop(&self) -> Result<Option<Task>, DomainError> {
        let now = self.clock.now();
        let mut tasks = self.tasks.lock().unwrap();
        let next = tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_ready(now))
            .min_by_key(|(index, t)| (t.execute_after, *index))
            .map(|(index, _)| index);
        let Some(index) = next else {
            return Ok(None);
        };
        let task = &mut tasks[index];
        task.claim(now)?;
        Ok(Some(task.clone()))
    }

    async fn complete(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<Option<Task>, DomainError> {
        let now = self.clock.now();
        Ok(self.transition(task_id, |task| task.complete(result, now)))
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<Option<Task>, DomainError> {
        let now = self.clock.now();
        Ok(self.transition(task_id, |task| task.fail(error, now).map(|_| ())))
    }

    async fn abandon(&self, task_id: Uuid, error: &str) -> Result<Option<Task>, DomainError> {
        Ok(self.transition(task_id, |task| task.abandon(error)))
    }

    async fn get(&self, task_id: Uuid) -> Result<Option<Task>, DomainError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == task_id)
            .cloned())
    }

    async fn tasks(&self) -> Result<Vec<Task>, DomainError> {
        Ok(self.tasks.lock().unwrap().clone())
    }
}

/// A queue whose every operation fails with a storage error.
#[derive(Debug)]
pub struct FailingTaskQueue;

#[async_trait]
impl TaskQueue for FailingTaskQueue {
    async fn push(
        &self,
        _kind: TaskKind,
        _payload: serde_json::Value,
        _delay: Duration,
    ) -> Result<Task, DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }

    async fn pop(&self) -> Result<Option<Task>, DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }

    async fn complete(
        &self,
        _task_id: Uuid,
        _result: serde_json::Value,
    ) -> Result<Option<Task>, DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }

    async fn fail(&self, _task_id: Uuid, _error: &str) -> Result<Option<Task>, DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }

    async fn abandon(&self, _task_id: Uuid, _error: &str) -> Result<Option<Task>, DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }

    async fn get(&self, _task_id: Uuid) -> Result<Option<Task>, DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }

    async fn tasks(&self) -> Result<Vec<Task>, DomainError> {
        Err(DomainError::Storage("database is locked".into()))
    }
}
