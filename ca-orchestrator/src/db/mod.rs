//! Orchestrator repositories

pub mod backends;
pub mod media;
pub mod tasks;
