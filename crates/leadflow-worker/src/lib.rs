//! Leadflow Worker: drains the task queue, one task at a time.
//!
//! The library holds the polling loop, its handler registry, the
//! environment configuration and the HTTP adapters used by the
//! `leadflow-worker` binary.

pub mod config;
pub mod error;
pub mod http_adapters;
pub mod worker;
