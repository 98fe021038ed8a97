//! Domain model shared by the orchestrator
//!
//! Cross references between tasks, backends, media items and media objects are
//! plain ids resolved through the repositories, never in-memory back-pointers.

pub mod backend;
pub mod media;
pub mod status;
pub mod task;

pub use backend::{Backend, Capability, DataGroup, DataGroups, DEFAULT_CAPABILITIES};
pub use media::{
    ConfirmationStatus, MediaItem, MediaObject, MediaType, ServiceType, ShapeType, Timecode,
    Visibility, VisualShape,
};
pub use status::{combine, BackendStatus, BackendStatusList, TaskStatus};
pub use task::{
    AnalysisType, BackendFeedbackTaskBuilder, FeedbackTaskBuilder, PayloadList, TaskDetails,
    TaskParameters, TaskPayload, TaskType, METADATA_RELATED_TASK_ID,
};

/// Task identity, assigned by the task store
pub type TaskId = i64;

/// Backend identity, assigned by the registry
pub type BackendId = i64;

/// User identity
pub type UserId = i64;

/// Stable external identity of a media item
pub type Guid = String;
