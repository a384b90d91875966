//! Leadflow Core: shared domain abstractions.
//!
//! This crate defines the traits and types the lead context, the durable
//! store and the background worker all depend on. It contains no
//! infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod event;
pub mod handler;
pub mod repository;
pub mod task;
