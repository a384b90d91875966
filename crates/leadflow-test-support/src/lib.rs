//! Shared test mocks and utilities for the leadflow lead pipeline.

mod clock;
mod queue;
mod repository;

pub use clock::{FixedClock, ManualClock};
pub use queue::{FailingTaskQueue, InMemoryTaskQueue};
pub use repository::{
    EmptyEventRepository, FailingEventRepository, InMemoryEventRepository,
    RecordingEventRepository,
};
