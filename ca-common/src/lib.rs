//! # Content Analysis Common Library
//!
//! Shared code for the content-analysis orchestrator including:
//! - Domain model (tasks, backends, media items and objects)
//! - Status aggregation across backends
//! - Event types and the EventBus
//! - Bootstrap configuration loading
//! - Database schema initialization

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod model;

pub use error::{Error, Result};
