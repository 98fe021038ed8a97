//! Analysis backends and their capabilities

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use super::media::MediaType;
use super::BackendId;
use crate::Error;

/// A tagged ability a backend advertises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    PhotoAnalysis,
    UserFeedback,
    BackendFeedback,
    PhotoSearch,
    /// Backend accepts tasks that have no owner
    AnonymousTask,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::PhotoAnalysis => "PHOTO_ANALYSIS",
            Capability::UserFeedback => "USER_FEEDBACK",
            Capability::BackendFeedback => "BACKEND_FEEDBACK",
            Capability::PhotoSearch => "PHOTO_SEARCH",
            Capability::AnonymousTask => "ANONYMOUS_TASK",
        }
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PHOTO_ANALYSIS" => Ok(Capability::PhotoAnalysis),
            "USER_FEEDBACK" => Ok(Capability::UserFeedback),
            "BACKEND_FEEDBACK" => Ok(Capability::BackendFeedback),
            "PHOTO_SEARCH" => Ok(Capability::PhotoSearch),
            "ANONYMOUS_TASK" => Ok(Capability::AnonymousTask),
            other => Err(Error::InvalidInput(format!("Unknown capability: {}", other))),
        }
    }
}

/// Capabilities a backend must hold to be attached to a new task by default
pub const DEFAULT_CAPABILITIES: [Capability; 3] = [
    Capability::UserFeedback,
    Capability::PhotoAnalysis,
    Capability::BackendFeedback,
];

/// Selector for the detail included in a task view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataGroup {
    All,
    Basic,
    Keywords,
    Faces,
    Metadata,
    Objects,
    Status,
}

/// Set of data groups describing how much detail a backend receives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataGroups(BTreeSet<DataGroup>);

impl DataGroups {
    pub fn new<I: IntoIterator<Item = DataGroup>>(groups: I) -> Self {
        Self(groups.into_iter().collect())
    }

    /// Only item identity and location
    pub fn basic() -> Self {
        Self::new([DataGroup::Basic])
    }

    pub fn contains(&self, group: DataGroup) -> bool {
        self.0.contains(&group)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether media objects of `media_type` belong in the view
    pub fn includes_media_type(&self, media_type: MediaType) -> bool {
        if self.contains(DataGroup::All) {
            return true;
        }
        let group = match media_type {
            MediaType::Keyword => DataGroup::Keywords,
            MediaType::Face => DataGroup::Faces,
            MediaType::Metadata => DataGroup::Metadata,
            MediaType::Object => DataGroup::Objects,
        };
        self.contains(group)
    }

    /// Whether any media object type is selected
    pub fn includes_media_objects(&self) -> bool {
        [MediaType::Keyword, MediaType::Face, MediaType::Metadata, MediaType::Object]
            .into_iter()
            .any(|t| self.includes_media_type(t))
    }

    pub fn includes_status(&self) -> bool {
        self.contains(DataGroup::All) || self.contains(DataGroup::Status)
    }
}

/// An independently operated analysis worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub backend_id: BackendId,
    /// Base URI; task methods are appended to it
    pub endpoint: String,
    pub enabled: bool,
    pub capabilities: BTreeSet<Capability>,
    pub default_data_groups: DataGroups,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Backend {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn has_all_capabilities(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }

    pub fn has_any_capability(&self, wanted: &[Capability]) -> bool {
        wanted.iter().any(|c| self.capabilities.contains(c))
    }

    /// Absolute URI for a backend method such as `addTask`
    pub fn method_uri(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(capabilities: &[Capability]) -> Backend {
        Backend {
            backend_id: 1,
            endpoint: "http://localhost:9000/ca/".to_string(),
            enabled: true,
            capabilities: capabilities.iter().copied().collect(),
            default_data_groups: DataGroups::basic(),
            description: None,
        }
    }

    #[test]
    fn test_method_uri_handles_trailing_slash() {
        let mut b = backend(&[]);
        assert_eq!(b.method_uri("addTask"), "http://localhost:9000/ca/addTask");
        b.endpoint = "http://localhost:9000/ca".to_string();
        assert_eq!(b.method_uri("addTask"), "http://localhost:9000/ca/addTask");
    }

    #[test]
    fn test_has_all_capabilities() {
        let b = backend(&[Capability::PhotoAnalysis, Capability::UserFeedback]);
        assert!(b.has_all_capabilities(&[Capability::PhotoAnalysis]));
        assert!(b.has_all_capabilities(&[]));
        assert!(!b.has_all_capabilities(&DEFAULT_CAPABILITIES));
    }

    #[test]
    fn test_capability_parse() {
        for c in [
            Capability::PhotoAnalysis,
            Capability::UserFeedback,
            Capability::BackendFeedback,
            Capability::PhotoSearch,
            Capability::AnonymousTask,
        ] {
            assert_eq!(c.as_str().parse::<Capability>().unwrap(), c);
        }
        assert!("FACEBOOK_SUMMARIZATION".parse::<Capability>().is_err());
    }

    #[test]
    fn test_data_groups_media_selection() {
        let basic = DataGroups::basic();
        assert!(!basic.includes_media_objects());
        assert!(!basic.includes_status());

        let keywords = DataGroups::new([DataGroup::Basic, DataGroup::Keywords]);
        assert!(keywords.includes_media_type(MediaType::Keyword));
        assert!(!keywords.includes_media_type(MediaType::Face));

        let all = DataGroups::new([DataGroup::All]);
        assert!(all.includes_media_type(MediaType::Object));
        assert!(all.includes_status());
    }
}
