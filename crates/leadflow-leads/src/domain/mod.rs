//! Domain layer: the lead aggregate, its events and commands.

pub mod aggregates;
pub mod commands;
pub mod events;
