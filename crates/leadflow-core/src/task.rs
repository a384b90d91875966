//! Durable task model and queue abstraction.
//!
//! A task moves `pending → processing → {completed | pending | failed}`.
//! The transitions live on [`Task`] so every queue backend enforces the same
//! rules; backends only decide how the claim is made atomic.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Retry ceiling applied when a queue is not configured otherwise.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Base delay of the exponential retry backoff.
pub const BACKOFF_BASE_SECS: i64 = 60;

const MAX_BACKOFF_EXPONENT: u32 = 20;

/// The closed set of asynchronous work kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Forward a lead to a CRM system.
    SendToCrm,
    /// Report a paid lead as an offline conversion to the ad platform.
    SendAdConversion,
}

impl TaskKind {
    /// Returns the stable storage tag for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendToCrm => "send_to_crm",
            Self::SendAdConversion => "send_ad_conversion",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_to_crm" => Ok(Self::SendToCrm),
            "send_ad_conversion" => Ok(Self::SendAdConversion),
            other => Err(DomainError::Storage(format!("unknown task kind: {other}"))),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for `execute_after` to pass.
    Pending,
    /// Claimed by the worker.
    Processing,
    /// Handler succeeded.
    Completed,
    /// Retries exhausted or no handler; never scheduled again.
    Failed,
}

impl TaskStatus {
    /// Returns the stable storage tag for this status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further transition can happen.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::Storage(format!("unknown task status: {other}"))),
        }
    }
}

/// Result of reporting a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// The task went back to `pending` and becomes eligible again at
    /// `execute_after`.
    Retrying {
        /// Earliest time of the next claim.
        execute_after: DateTime<Utc>,
    },
    /// The retry budget is spent; the task is dead-lettered as `failed`.
    Exhausted,
}

/// A unit of asynchronous work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: Uuid,
    /// Selects the handler.
    pub kind: TaskKind,
    /// Handler-specific input.
    pub payload: serde_json::Value,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// When the task was pushed.
    pub created_at: DateTime<Utc>,
    /// Earliest time the task may be claimed.
    pub execute_after: DateTime<Utc>,
    /// Number of claims so far.
    pub attempts: u32,
    /// Retry ceiling.
    pub max_attempts: u32,
    /// Time of the latest claim.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the handler succeeded.
    pub completed_at: Option<DateTime<Utc>>,
    /// Handler output of the successful attempt.
    pub result: Option<serde_json::Value>,
    /// Reason of the latest failed attempt.
    pub error: Option<String>,
}

impl Task {
    /// Creates a pending task that becomes eligible at `execute_after`.
    #[must_use]
    pub fn new(
        kind: TaskKind,
        payload: serde_json::Value,
        max_attempts: u32,
        created_at: DateTime<Utc>,
        execute_after: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            status: TaskStatus::Pending,
            created_at,
            execute_after,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Whether `pop` may claim this task at `now`.
    #[must_use]
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending
            && self.execute_after <= now
            && self.attempts < self.max_attempts
    }

    /// Claims the task for execution, counting one attempt.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTaskTransition` if the task is not ready.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.is_ready(now) {
            return Err(self.invalid("claim"));
        }
        self.status = TaskStatus::Processing;
        self.started_at = Some(now);
        self.attempts += 1;
        Ok(())
    }

    /// Marks the claimed task as completed with the handler's output.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTaskTransition` unless the task is
    /// processing.
    pub fn complete(
        &mut self,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status != TaskStatus::Processing {
            return Err(self.invalid("complete"));
        }
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        self.result = Some(result);
        Ok(())
    }

    /// Records a failed attempt. While attempts remain the task returns to
    /// `pending` after the backoff for this failure; otherwise it is failed
    /// permanently.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTaskTransition` unless the task is
    /// processing.
    pub fn fail(&mut self, error: &str, now: DateTime<Utc>) -> Result<FailOutcome, DomainError> {
        if self.status != TaskStatus::Processing {
            return Err(self.invalid("fail"));
        }
        self.error = Some(error.to_owned());
        if self.attempts < self.max_attempts {
            let execute_after = now + backoff_delay(self.attempts);
            self.status = TaskStatus::Pending;
            self.execute_after = execute_after;
            Ok(FailOutcome::Retrying { execute_after })
        } else {
            self.status = TaskStatus::Failed;
            Ok(FailOutcome::Exhausted)
        }
    }

    /// Fails the claimed task permanently, whatever attempts remain.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTaskTransition` unless the task is
    /// processing.
    pub fn abandon(&mut self, error: &str) -> Result<(), DomainError> {
        if self.status != TaskStatus::Processing {
            return Err(self.invalid("abandon"));
        }
        self.status = TaskStatus::Failed;
        self.error = Some(error.to_owned());
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTaskTransition {
            task_id: self.id,
            action,
            status: self.status.to_string(),
        }
    }
}

/// Delay before the next attempt after the `failures`-th failure:
/// `60s * 2^(failures - 1)`.
#[must_use]
pub fn backoff_delay(failures: u32) -> TimeDelta {
    let exponent = failures.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
    TimeDelta::seconds(BACKOFF_BASE_SECS << exponent)
}

/// Durable queue of tasks.
///
/// `complete`, `fail` and `abandon` only act on tasks that are still
/// `processing`; for any other task, or an unknown id, they return
/// `Ok(None)`.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues a pending task eligible after `delay`.
    async fn push(
        &self,
        kind: TaskKind,
        payload: serde_json::Value,
        delay: std::time::Duration,
    ) -> Result<Task, DomainError>;

    /// Atomically claims the next eligible task, if any.
    async fn pop(&self) -> Result<Option<Task>, DomainError>;

    /// Stores the handler's result and marks the task completed.
    async fn complete(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<Option<Task>, DomainError>;

    /// Records a failed attempt and reschedules or fails the task.
    async fn fail(&self, task_id: Uuid, error: &str) -> Result<Option<Task>, DomainError>;

    /// Fails the task permanently without further retries.
    async fn abandon(&self, task_id: Uuid, error: &str) -> Result<Option<Task>, DomainError>;

    /// Looks up a task by id.
    async fn get(&self, task_id: Uuid) -> Result<Option<Task>, DomainError>;

    /// Returns every task in storage order.
    async fn tasks(&self) -> Result<Vec<Task>, DomainError>;
}
