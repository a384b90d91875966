//! Application layer: command and query handlers, the event log with its
//! reaction registry, and the task handlers run by the worker.

pub mod command_handlers;
pub mod event_log;
pub mod query_handlers;
pub mod reactions;
pub mod task_handlers;
