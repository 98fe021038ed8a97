//! Tasks, their payloads and the builders that enforce payload shape
//!
//! A task's payload is exactly one of a plain media list, a similarity triple
//! (reference/similar/dissimilar) or a deleted-media list. [`TaskPayload`] makes
//! mixing kinds unrepresentable; the builders reject inputs that try to.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use super::backend::Capability;
use super::media::MediaItem;
use super::status::BackendStatusList;
use super::{BackendId, Guid, TaskId, UserId};
use crate::{Error, Result};

/// Metadata key linking a backend feedback task to the task whose results it carries
pub const METADATA_RELATED_TASK_ID: &str = "related_task_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Undefined,
    Analysis,
    Search,
    Feedback,
    BackendFeedback,
}

impl TaskType {
    pub fn code(self) -> i64 {
        match self {
            TaskType::Undefined => 0,
            TaskType::Analysis => 1,
            TaskType::Search => 2,
            TaskType::Feedback => 3,
            TaskType::BackendFeedback => 7,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => TaskType::Analysis,
            2 => TaskType::Search,
            3 => TaskType::Feedback,
            7 => TaskType::BackendFeedback,
            _ => TaskType::Undefined,
        }
    }

    /// Capabilities a backend must hold (all of them) to receive this task type.
    ///
    /// `None` means the type cannot be delivered through the task executor.
    pub fn required_capabilities(self) -> Option<&'static [Capability]> {
        match self {
            TaskType::Analysis => Some(&[Capability::PhotoAnalysis]),
            TaskType::Feedback => Some(&[Capability::PhotoAnalysis, Capability::UserFeedback]),
            TaskType::BackendFeedback => {
                Some(&[Capability::PhotoAnalysis, Capability::BackendFeedback])
            }
            TaskType::Search | TaskType::Undefined => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    FaceDetection,
    KeywordExtraction,
    Visual,
}

impl AnalysisType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisType::FaceDetection => "face_detection",
            AnalysisType::KeywordExtraction => "keyword_extraction",
            AnalysisType::Visual => "visual",
        }
    }
}

/// Type-specific task options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskParameters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub analysis_types: Vec<AnalysisType>,
}

/// Which payload list a GUID belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadList {
    Media,
    Reference,
    Similar,
    Dissimilar,
    Deleted,
}

impl PayloadList {
    pub fn as_str(self) -> &'static str {
        match self {
            PayloadList::Media => "media",
            PayloadList::Reference => "reference",
            PayloadList::Similar => "similar",
            PayloadList::Dissimilar => "dissimilar",
            PayloadList::Deleted => "deleted",
        }
    }
}

impl FromStr for PayloadList {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "media" => Ok(PayloadList::Media),
            "reference" => Ok(PayloadList::Reference),
            "similar" => Ok(PayloadList::Similar),
            "dissimilar" => Ok(PayloadList::Dissimilar),
            "deleted" => Ok(PayloadList::Deleted),
            other => Err(Error::Internal(format!("Unknown payload list: {}", other))),
        }
    }
}

/// Task content, one kind per task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Media {
        items: Vec<MediaItem>,
    },
    Similarity {
        reference: Vec<MediaItem>,
        #[serde(default)]
        similar: Vec<MediaItem>,
        #[serde(default)]
        dissimilar: Vec<MediaItem>,
    },
    Deleted {
        guids: Vec<Guid>,
    },
}

impl TaskPayload {
    /// Every GUID in the payload, tagged with its list, in payload order
    pub fn entries(&self) -> Vec<(PayloadList, &str)> {
        fn tag(list: PayloadList, items: &[MediaItem]) -> Vec<(PayloadList, &str)> {
            items.iter().map(|i| (list, i.guid.as_str())).collect()
        }
        match self {
            TaskPayload::Media { items } => tag(PayloadList::Media, items),
            TaskPayload::Similarity {
                reference,
                similar,
                dissimilar,
            } => {
                let mut out = tag(PayloadList::Reference, reference);
                out.extend(tag(PayloadList::Similar, similar));
                out.extend(tag(PayloadList::Dissimilar, dissimilar));
                out
            }
            TaskPayload::Deleted { guids } => guids
                .iter()
                .map(|g| (PayloadList::Deleted, g.as_str()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            TaskPayload::Media { items } => items.is_empty(),
            TaskPayload::Similarity {
                reference,
                similar,
                dissimilar,
            } => reference.is_empty() && similar.is_empty() && dissimilar.is_empty(),
            TaskPayload::Deleted { guids } => guids.is_empty(),
        }
    }

    /// Media items carried by the payload (deleted lists carry none)
    pub fn items(&self) -> Vec<&MediaItem> {
        match self {
            TaskPayload::Media { items } => items.iter().collect(),
            TaskPayload::Similarity {
                reference,
                similar,
                dissimilar,
            } => reference.iter().chain(similar).chain(dissimilar).collect(),
            TaskPayload::Deleted { .. } => Vec::new(),
        }
    }

    fn validate_similarity(
        reference: &[MediaItem],
        similar: &[MediaItem],
        dissimilar: &[MediaItem],
    ) -> Result<()> {
        if reference.is_empty() {
            return Err(Error::InvalidPayload(
                "similar or dissimilar media given without reference media".to_string(),
            ));
        }
        if similar.is_empty() && dissimilar.is_empty() {
            return Err(Error::InvalidPayload(
                "reference media given without similar or dissimilar media".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for item in reference.iter().chain(similar).chain(dissimilar) {
            if !seen.insert(item.guid.as_str()) {
                return Err(Error::InvalidPayload(format!(
                    "GUID {} appears in more than one feedback list",
                    item.guid
                )));
            }
        }
        Ok(())
    }
}

/// A unit of work distributed to one or more backends
///
/// The same structure is persisted by the dispatcher and sent to backends as the
/// `addTask` body; in the latter case `backend_id` names the receiving backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    pub task_type: TaskType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<BackendId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_uri: Option<String>,
    #[serde(default, skip_serializing_if = "BackendStatusList::is_empty")]
    pub backends: BackendStatusList,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<TaskParameters>,
    pub payload: TaskPayload,
}

impl TaskDetails {
    fn with_payload(task_type: TaskType, owner: Option<UserId>, payload: TaskPayload) -> Self {
        Self {
            task_id: None,
            task_type,
            owner,
            backend_id: None,
            callback_uri: None,
            backends: BackendStatusList::new(),
            metadata: BTreeMap::new(),
            parameters: None,
            payload,
        }
    }

    /// New analysis task for the given media
    pub fn analysis(
        owner: Option<UserId>,
        items: Vec<MediaItem>,
        parameters: Option<TaskParameters>,
    ) -> Result<Self> {
        if items.is_empty() {
            return Err(Error::InvalidPayload("analysis task without media".to_string()));
        }
        let mut task = Self::with_payload(TaskType::Analysis, owner, TaskPayload::Media { items });
        task.parameters = parameters;
        Ok(task)
    }

    /// Check the payload fits the task type
    pub fn validate(&self) -> Result<()> {
        if self.payload.is_empty() {
            return Err(Error::InvalidPayload(format!(
                "{} task without payload",
                self.task_type
            )));
        }
        match (&self.task_type, &self.payload) {
            (TaskType::Analysis, TaskPayload::Media { .. })
            | (TaskType::BackendFeedback, TaskPayload::Media { .. })
            | (TaskType::Feedback, TaskPayload::Media { .. })
            | (TaskType::Feedback, TaskPayload::Deleted { .. }) => Ok(()),
            (
                TaskType::Feedback,
                TaskPayload::Similarity {
                    reference,
                    similar,
                    dissimilar,
                },
            ) => TaskPayload::validate_similarity(reference, similar, dissimilar),
            (task_type, _) => Err(Error::InvalidPayload(format!(
                "payload kind not allowed for {} task",
                task_type
            ))),
        }
    }

    /// Related task id recorded in metadata, if any
    pub fn related_task_id(&self) -> Option<TaskId> {
        self.metadata
            .get(METADATA_RELATED_TASK_ID)
            .and_then(|v| v.parse().ok())
    }
}

/// Builds user feedback tasks
///
/// Exactly one of: plain media, deleted GUIDs, or reference media with similar
/// and/or dissimilar media.
#[derive(Debug, Default)]
pub struct FeedbackTaskBuilder {
    owner: Option<UserId>,
    media: Vec<MediaItem>,
    reference: Vec<MediaItem>,
    similar: Vec<MediaItem>,
    dissimilar: Vec<MediaItem>,
    deleted: Vec<Guid>,
}

impl FeedbackTaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(mut self, owner: UserId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn add_media(mut self, item: MediaItem) -> Self {
        self.media.push(item);
        self
    }

    pub fn add_reference(mut self, item: MediaItem) -> Self {
        self.reference.push(item);
        self
    }

    pub fn add_similar(mut self, item: MediaItem) -> Self {
        self.similar.push(item);
        self
    }

    pub fn add_dissimilar(mut self, item: MediaItem) -> Self {
        self.dissimilar.push(item);
        self
    }

    pub fn add_deleted(mut self, guid: impl Into<Guid>) -> Self {
        self.deleted.push(guid.into());
        self
    }

    /// Build the task, `Ok(None)` when nothing was added
    pub fn build(self) -> Result<Option<TaskDetails>> {
        let has_media = !self.media.is_empty();
        let has_deleted = !self.deleted.is_empty();
        let has_similarity =
            !(self.reference.is_empty() && self.similar.is_empty() && self.dissimilar.is_empty());

        let kinds = [has_media, has_deleted, has_similarity]
            .iter()
            .filter(|present| **present)
            .count();
        if kinds > 1 {
            return Err(Error::InvalidPayload(
                "feedback task may carry only one of media, deleted or similarity lists"
                    .to_string(),
            ));
        }

        let payload = if has_media {
            TaskPayload::Media { items: self.media }
        } else if has_deleted {
            TaskPayload::Deleted {
                guids: self.deleted,
            }
        } else if has_similarity {
            TaskPayload::validate_similarity(&self.reference, &self.similar, &self.dissimilar)?;
            TaskPayload::Similarity {
                reference: self.reference,
                similar: self.similar,
                dissimilar: self.dissimilar,
            }
        } else {
            return Ok(None);
        };

        Ok(Some(TaskDetails::with_payload(
            TaskType::Feedback,
            self.owner,
            payload,
        )))
    }
}

/// Builds backend feedback tasks, which only ever carry a plain media list
#[derive(Debug, Default)]
pub struct BackendFeedbackTaskBuilder {
    media: Vec<MediaItem>,
    backends: BackendStatusList,
    related_task_id: Option<TaskId>,
}

impl BackendFeedbackTaskBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_media(mut self, item: MediaItem) -> Self {
        self.media.push(item);
        self
    }

    pub fn add_media_list(mut self, items: impl IntoIterator<Item = MediaItem>) -> Self {
        self.media.extend(items);
        self
    }

    pub fn backends(mut self, backends: BackendStatusList) -> Self {
        self.backends = backends;
        self
    }

    pub fn related_task(mut self, task_id: TaskId) -> Self {
        self.related_task_id = Some(task_id);
        self
    }

    /// Build the task, `None` when there is no media to share
    pub fn build(self) -> Option<TaskDetails> {
        if self.media.is_empty() {
            return None;
        }
        let mut task = TaskDetails::with_payload(
            TaskType::BackendFeedback,
            None,
            TaskPayload::Media { items: self.media },
        );
        task.backends = self.backends;
        if let Some(related) = self.related_task_id {
            task.metadata
                .insert(METADATA_RELATED_TASK_ID.to_string(), related.to_string());
        }
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_rejects_media_and_deleted_together() {
        let result = FeedbackTaskBuilder::new()
            .owner(1)
            .add_media(MediaItem::new("g1"))
            .add_deleted("g2")
            .build();

        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_feedback_rejects_deleted_and_similarity_together() {
        let result = FeedbackTaskBuilder::new()
            .add_reference(MediaItem::new("r"))
            .add_similar(MediaItem::new("s"))
            .add_deleted("d")
            .build();

        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_feedback_single_kinds_build() {
        let media = FeedbackTaskBuilder::new()
            .owner(3)
            .add_media(MediaItem::new("g1"))
            .build()
            .unwrap()
            .unwrap();
        assert_eq!(media.task_type, TaskType::Feedback);
        assert_eq!(media.owner, Some(3));
        assert!(matches!(media.payload, TaskPayload::Media { .. }));

        let deleted = FeedbackTaskBuilder::new().add_deleted("g1").build().unwrap().unwrap();
        assert!(matches!(deleted.payload, TaskPayload::Deleted { .. }));
        assert!(deleted.validate().is_ok());
    }

    #[test]
    fn test_feedback_empty_builds_nothing() {
        assert!(FeedbackTaskBuilder::new().owner(1).build().unwrap().is_none());
    }

    #[test]
    fn test_similarity_requires_reference_and_counterpart() {
        let without_reference = FeedbackTaskBuilder::new()
            .add_similar(MediaItem::new("s"))
            .build();
        assert!(without_reference.is_err());

        let without_counterpart = FeedbackTaskBuilder::new()
            .add_reference(MediaItem::new("r"))
            .build();
        assert!(without_counterpart.is_err());

        let ok = FeedbackTaskBuilder::new()
            .add_reference(MediaItem::new("r"))
            .add_dissimilar(MediaItem::new("d"))
            .build()
            .unwrap()
            .unwrap();
        assert_eq!(
            ok.payload.entries(),
            vec![(PayloadList::Reference, "r"), (PayloadList::Dissimilar, "d")]
        );
    }

    #[test]
    fn test_similarity_rejects_guid_in_two_lists() {
        let result = FeedbackTaskBuilder::new()
            .add_reference(MediaItem::new("x"))
            .add_similar(MediaItem::new("y"))
            .add_dissimilar(MediaItem::new("x"))
            .build();

        assert!(matches!(result, Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn test_backend_feedback_carries_plain_list_and_related_task() {
        assert!(BackendFeedbackTaskBuilder::new().related_task(5).build().is_none());

        let task = BackendFeedbackTaskBuilder::new()
            .add_media(MediaItem::new("g1"))
            .related_task(5)
            .build()
            .unwrap();
        assert_eq!(task.task_type, TaskType::BackendFeedback);
        assert_eq!(task.related_task_id(), Some(5));
        assert!(task.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_type_and_payload() {
        let mut task = TaskDetails::analysis(Some(1), vec![MediaItem::new("g")], None).unwrap();
        assert!(task.validate().is_ok());

        task.payload = TaskPayload::Deleted {
            guids: vec!["g".to_string()],
        };
        assert!(task.validate().is_err());

        task.task_type = TaskType::Search;
        assert!(task.validate().is_err());

        assert!(TaskDetails::analysis(None, Vec::new(), None).is_err());
    }

    #[test]
    fn test_payload_wire_shape() {
        let payload = TaskPayload::Deleted {
            guids: vec!["a".to_string()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "deleted", "guids": ["a"] }));
    }

    #[test]
    fn test_required_capabilities() {
        assert_eq!(
            TaskType::Analysis.required_capabilities(),
            Some(&[Capability::PhotoAnalysis][..])
        );
        assert!(TaskType::Search.required_capabilities().is_none());
        assert_eq!(TaskType::from_code(TaskType::BackendFeedback.code()), TaskType::BackendFeedback);
    }
}
