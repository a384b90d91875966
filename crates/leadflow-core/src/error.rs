//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An aggregate has no events in the store.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(String),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// The event log or task collection could not be read or written.
    #[error("storage failure: {0}")]
    Storage(String),

    /// A task was asked to make a transition its current status forbids.
    #[error("task {task_id} cannot {action} while {status}")]
    InvalidTaskTransition {
        /// The task that rejected the transition.
        task_id: Uuid,
        /// The attempted transition.
        action: &'static str,
        /// The status the task was in.
        status: String,
    },
}
