//! Media items and the analysis results (media objects) attached to them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::BackendStatusList;
use super::{BackendId, Guid, UserId};

/// Kind of analysis result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Keyword,
    Metadata,
    Object,
    Face,
}

impl MediaType {
    pub fn code(self) -> i64 {
        match self {
            MediaType::Keyword => 1,
            MediaType::Metadata => 2,
            MediaType::Object => 3,
            MediaType::Face => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(MediaType::Keyword),
            2 => Some(MediaType::Metadata),
            3 => Some(MediaType::Object),
            4 => Some(MediaType::Face),
            _ => None,
        }
    }
}

/// Whether a result has been accepted, rejected or withdrawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfirmationStatus {
    Candidate,
    UserConfirmed,
    UserRejected,
    BackendRemoved,
    NoFriendlyKeyword,
}

impl ConfirmationStatus {
    pub fn code(self) -> i64 {
        match self {
            ConfirmationStatus::Candidate => 1,
            ConfirmationStatus::UserConfirmed => 2,
            ConfirmationStatus::UserRejected => 3,
            ConfirmationStatus::BackendRemoved => 4,
            ConfirmationStatus::NoFriendlyKeyword => 5,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ConfirmationStatus::Candidate),
            2 => Some(ConfirmationStatus::UserConfirmed),
            3 => Some(ConfirmationStatus::UserRejected),
            4 => Some(ConfirmationStatus::BackendRemoved),
            5 => Some(ConfirmationStatus::NoFriendlyKeyword),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    Public,
    #[default]
    Private,
    Group,
}

impl Visibility {
    pub fn code(self) -> i64 {
        match self {
            Visibility::Public => 0,
            Visibility::Private => 1,
            Visibility::Group => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Visibility::Public),
            1 => Some(Visibility::Private),
            2 => Some(Visibility::Group),
            _ => None,
        }
    }
}

/// Content service a media item was imported from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceType {
    Picasa,
    Fsio,
    FacebookJazz,
    FacebookPhoto,
    TwitterJazz,
    TwitterPhoto,
    UrlStorage,
}

impl ServiceType {
    pub fn code(self) -> i64 {
        match self {
            ServiceType::Picasa => 1,
            ServiceType::Fsio => 2,
            ServiceType::FacebookJazz => 3,
            ServiceType::FacebookPhoto => 4,
            ServiceType::TwitterJazz => 5,
            ServiceType::TwitterPhoto => 6,
            ServiceType::UrlStorage => 7,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ServiceType::Picasa),
            2 => Some(ServiceType::Fsio),
            3 => Some(ServiceType::FacebookJazz),
            4 => Some(ServiceType::FacebookPhoto),
            5 => Some(ServiceType::TwitterJazz),
            6 => Some(ServiceType::TwitterPhoto),
            7 => Some(ServiceType::UrlStorage),
            _ => None,
        }
    }
}

/// Time range (seconds) within a video the object refers to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timecode {
    pub start: f64,
    pub end: f64,
}

impl Timecode {
    pub fn is_valid(&self) -> bool {
        self.start >= 0.0 && self.end >= self.start
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Circle,
    Rectangle,
    Triangle,
    Polygon,
}

/// Region of the media an object was detected in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualShape {
    pub shape_type: ShapeType,
    /// Coordinates as `[x, y]` pairs
    pub points: Vec<[f64; 2]>,
}

impl VisualShape {
    pub fn is_valid(&self) -> bool {
        !self.points.is_empty() && self.points.iter().flatten().all(|c| c.is_finite())
    }
}

/// One analysis result attached to a media item
///
/// Identity is either `media_object_id` (assigned on insert) or the
/// `(backend_id, object_id)` pair chosen by whoever created it. User-created
/// objects have no `backend_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<BackendId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_status: Option<ConfirmationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<VisualShape>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub timecodes: Vec<Timecode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl MediaObject {
    /// Keyword candidate as a backend would submit it
    pub fn keyword(object_id: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            object_id: Some(object_id.into()),
            media_type: Some(MediaType::Keyword),
            confirmation_status: Some(ConfirmationStatus::Candidate),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// Check that the object can be stored
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.object_id.as_deref().map_or(true, str::is_empty) {
            return Err("media object without object_id".to_string());
        }
        let media_type = self
            .media_type
            .ok_or_else(|| "media object without media_type".to_string())?;
        if self.confirmation_status.is_none() {
            return Err("media object without confirmation_status".to_string());
        }
        match media_type {
            MediaType::Keyword if self.value.is_none() => {
                return Err("keyword object without value".to_string());
            }
            MediaType::Metadata if self.name.is_none() || self.value.is_none() => {
                return Err("metadata object without name or value".to_string());
            }
            _ => {}
        }
        if self.timecodes.iter().any(|t| !t.is_valid()) {
            return Err("media object with invalid timecode".to_string());
        }
        if let Some(shape) = &self.shape {
            if !shape.is_valid() {
                return Err("media object with invalid shape".to_string());
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// A photo or video known by its GUID
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub guid: Guid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<ServiceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_objects: Vec<MediaObject>,
    #[serde(default, skip_serializing_if = "BackendStatusList::is_empty")]
    pub backend_status: BackendStatusList,
}

impl MediaItem {
    pub fn new(guid: impl Into<Guid>) -> Self {
        Self {
            guid: guid.into(),
            ..Default::default()
        }
    }
}
