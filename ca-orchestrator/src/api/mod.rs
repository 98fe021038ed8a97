//! HTTP API handlers
//!
//! Inbound surface for users (submission, media feedback, search, task
//! inspection) and for backends (`taskFinished`, `queryTaskDetails`).

pub mod backends;
pub mod health;
pub mod media;
pub mod search;
pub mod sse;
pub mod tasks;

pub use backends::backend_routes;
pub use health::health_routes;
pub use media::media_routes;
pub use search::search_routes;
pub use sse::event_stream;
pub use tasks::task_routes;
