//! Task worker: claims tasks from the queue and runs their handlers.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use leadflow_core::error::DomainError;
use leadflow_core::handler::{HandlerError, TaskHandler};
use leadflow_core::task::{Task, TaskKind, TaskQueue, TaskStatus};
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Configuration for the task worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker name, used in logs.
    pub name: String,
    /// Sleep between polls when the queue has nothing eligible.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "leadflow-worker".to_owned(),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Maps each task kind to the handler that executes it.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    /// The handler registered for `kind`.
    #[must_use]
    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Registered kinds, sorted by tag.
    #[must_use]
    pub fn kinds(&self) -> Vec<TaskKind> {
        let mut kinds: Vec<TaskKind> = self.handlers.keys().copied().collect();
        kinds.sort_by_key(|kind| kind.as_str());
        kinds
    }
}

/// What a single poll of the queue did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Nothing was eligible.
    Idle,
    /// The handler succeeded and the task is completed.
    Completed {
        /// The processed task.
        task_id: Uuid,
    },
    /// The handler failed and the task is pending again.
    Retrying {
        /// The processed task.
        task_id: Uuid,
        /// Earliest time of the next attempt.
        execute_after: DateTime<Utc>,
    },
    /// The task is failed for good: retries exhausted or no handler.
    DeadLettered {
        /// The processed task.
        task_id: Uuid,
    },
    /// The task was settled elsewhere while its handler ran. The handler
    /// outcome was dropped.
    Superseded {
        /// The processed task.
        task_id: Uuid,
    },
}

/// Single consumer of a task queue. Tasks are processed strictly one at a
/// time.
pub struct Worker {
    queue: Arc<dyn TaskQueue>,
    handlers: HandlerRegistry,
    config: WorkerConfig,
}

impl Worker {
    /// Creates a worker over `queue`.
    #[must_use]
    pub fn new(queue: Arc<dyn TaskQueue>, handlers: HandlerRegistry, config: WorkerConfig) -> Self {
        Self {
            queue,
            handlers,
            config,
        }
    }

    /// Claims at most one task and settles it.
    ///
    /// A task without a registered handler is failed permanently. A handler
    /// error or panic counts as one failed attempt.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the queue cannot be read or updated.
    pub async fn run_once(&self) -> Result<PollOutcome, DomainError> {
        let Some(task) = self.queue.pop().await? else {
            return Ok(PollOutcome::Idle);
        };
        info!(
            worker = %self.config.name,
            task_id = %task.id,
            kind = %task.kind,
            attempt = task.attempts,
            max_attempts = task.max_attempts,
            "claimed task"
        );

        let Some(handler) = self.handlers.get(task.kind) else {
            let reason = HandlerError::UnknownHandler(task.kind).to_string();
            self.queue.abandon(task.id, &reason).await?;
            warn!(task_id = %task.id, kind = %task.kind, "no handler; task dead-lettered");
            return Ok(PollOutcome::DeadLettered { task_id: task.id });
        };

        let task_id = task.id;
        match execute(handler, task).await {
            Ok(result) => {
                if self.queue.complete(task_id, result).await?.is_none() {
                    warn!(%task_id, "task no longer processing; result dropped");
                    return Ok(PollOutcome::Superseded { task_id });
                }
                info!(%task_id, "task completed");
                Ok(PollOutcome::Completed { task_id })
            }
            Err(reason) => {
                let settled = self.queue.fail(task_id, &reason).await?;
                match settled {
                    Some(task) if task.status == TaskStatus::Pending => {
                        warn!(
                            %task_id,
                            error = %reason,
                            execute_after = %task.execute_after,
                            "task failed; retry scheduled"
                        );
                        Ok(PollOutcome::Retrying {
                            task_id,
                            execute_after: task.execute_after,
                        })
                    }
                    Some(_) => {
                        error!(%task_id, error = %reason, "task failed permanently");
                        Ok(PollOutcome::DeadLettered { task_id })
                    }
                    None => {
                        warn!(
                            %task_id,
                            error = %reason,
                            "task no longer processing; failure dropped"
                        );
                        Ok(PollOutcome::Superseded { task_id })
                    }
                }
            }
        }
    }

    /// Polls until `shutdown` reads `true` or its sender is dropped.
    ///
    /// The worker sleeps `poll_interval` only when the queue is idle or a
    /// storage error occurred; the sleep ends early on shutdown. A task that
    /// is already running is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            worker = %self.config.name,
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            handlers = ?self.handlers.kinds(),
            "worker started"
        );

        while !*shutdown.borrow() {
            let pause = match self.run_once().await {
                Ok(PollOutcome::Idle) => true,
                Ok(_) => false,
                Err(err) => {
                    error!(worker = %self.config.name, error = %err, "poll failed");
                    true
                }
            };
            if pause {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        info!(worker = %self.config.name, "worker stopped");
    }
}

/// Runs the handler on its own tokio task so a panic is caught as a failed
/// attempt. Errors are rendered to the text stored on the task.
async fn execute(handler: Arc<dyn TaskHandler>, task: Task) -> Result<serde_json::Value, String> {
    match tokio::spawn(async move { handler.handle(&task).await }).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err.to_string()),
        Err(join_err) if join_err.is_panic() => Err(format!(
            "handler panicked: {}",
            panic_message(join_err.into_panic().as_ref())
        )),
        Err(join_err) => Err(format!("handler aborted: {join_err}")),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
