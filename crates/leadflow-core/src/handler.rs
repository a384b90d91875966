//! Task handler contract.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::DomainError;
use crate::task::{Task, TaskKind};

/// Why a handler did not produce a result. The worker turns every variant
/// into a queue transition; none of them stops the worker.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler gave up with a descriptive reason.
    #[error("{0}")]
    Failed(String),

    /// The external destination answered with a non-2xx status.
    #[error("destination rejected delivery with status {status}: {body}")]
    Rejected {
        /// Status code returned by the destination.
        status: u16,
        /// Response body, for the task's error field.
        body: String,
    },

    /// No handler is registered for the task's kind.
    #[error("no handler registered for task type {0}")]
    UnknownHandler(TaskKind),

    /// A domain or storage error raised while handling the task.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Executes one kind of task.
///
/// Retries re-run the handler from scratch, so a handler must not leave
/// partial side effects it cannot repeat.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Handles the task and returns the result stored on completion.
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, HandlerError>;
}
