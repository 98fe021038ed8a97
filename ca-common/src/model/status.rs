//! Task status values and multi-backend status aggregation
//!
//! Every backend assigned to a task reports its own [`TaskStatus`]. The task as a
//! whole (and each media item within a task round) is described by folding those
//! per-backend values with [`combine`].

use serde::{Deserialize, Serialize};

use super::BackendId;

/// Processing state of one backend for one task (or one media item)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Unknown,
    NotStarted,
    Pending,
    Executing,
    Completed,
    Error,
}

impl TaskStatus {
    /// All status values, in code order
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Unknown,
        TaskStatus::NotStarted,
        TaskStatus::Pending,
        TaskStatus::Executing,
        TaskStatus::Completed,
        TaskStatus::Error,
    ];

    /// Storage code
    pub fn code(self) -> i64 {
        match self {
            TaskStatus::Unknown => 0,
            TaskStatus::NotStarted => 1,
            TaskStatus::Pending => 2,
            TaskStatus::Executing => 3,
            TaskStatus::Completed => 4,
            TaskStatus::Error => 5,
        }
    }

    /// Parse a storage code. Unrecognized codes map to `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => TaskStatus::NotStarted,
            2 => TaskStatus::Pending,
            3 => TaskStatus::Executing,
            4 => TaskStatus::Completed,
            5 => TaskStatus::Error,
            _ => TaskStatus::Unknown,
        }
    }

    /// COMPLETED and ERROR never transition again within a round
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }

    fn bit(self) -> u8 {
        1 << self.code()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Unknown => "UNKNOWN",
            TaskStatus::NotStarted => "NOT_STARTED",
            TaskStatus::Pending => "PENDING",
            TaskStatus::Executing => "EXECUTING",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Set of statuses observed while folding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Observed(u8);

impl Observed {
    fn insert(&mut self, status: TaskStatus) {
        self.0 |= status.bit();
    }

    fn has(self, status: TaskStatus) -> bool {
        self.0 & status.bit() != 0
    }

    fn resolve(self) -> TaskStatus {
        if self.has(TaskStatus::Error) {
            return TaskStatus::Error;
        }
        if self.has(TaskStatus::Executing) {
            return TaskStatus::Executing;
        }
        if self.has(TaskStatus::Pending) {
            return TaskStatus::Pending;
        }
        match (self.has(TaskStatus::NotStarted), self.has(TaskStatus::Completed)) {
            // some backends done, others not yet started: the round is in progress
            (true, true) => TaskStatus::Pending,
            (false, true) => TaskStatus::Completed,
            (true, false) => TaskStatus::NotStarted,
            (false, false) => TaskStatus::Unknown,
        }
    }
}

/// Combine per-backend statuses into one status.
///
/// The result depends only on which statuses are present, never on their order
/// or multiplicity:
///
/// | present                          | result        |
/// |----------------------------------|---------------|
/// | ERROR                            | ERROR         |
/// | EXECUTING                        | EXECUTING     |
/// | PENDING                          | PENDING       |
/// | NOT_STARTED and COMPLETED        | PENDING       |
/// | COMPLETED only                   | COMPLETED     |
/// | NOT_STARTED only                 | NOT_STARTED   |
/// | UNKNOWN only                     | UNKNOWN       |
/// | nothing                          | `None`        |
///
/// Rows are checked top to bottom. UNKNOWN never changes the outcome when any
/// other status is present.
pub fn combine<I>(statuses: I) -> Option<TaskStatus>
where
    I: IntoIterator<Item = TaskStatus>,
{
    let mut observed = Observed::default();
    let mut any = false;
    for status in statuses {
        any = true;
        if status == TaskStatus::Error {
            return Some(TaskStatus::Error);
        }
        observed.insert(status);
    }
    any.then(|| observed.resolve())
}

/// One backend's progress state for one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub backend_id: BackendId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BackendStatus {
    pub fn new(backend_id: BackendId, status: TaskStatus) -> Self {
        Self {
            backend_id,
            status,
            message: None,
        }
    }
}

/// Per-backend statuses, unique by backend id
///
/// Serialized as a plain JSON array. Setting a status for a backend that is
/// already listed replaces the prior entry in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendStatusList(Vec<BackendStatus>);

impl BackendStatusList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list where every given backend has the same status
    pub fn with_status<I>(backend_ids: I, status: TaskStatus) -> Self
    where
        I: IntoIterator<Item = BackendId>,
    {
        let mut list = Self::new();
        for backend_id in backend_ids {
            list.set(BackendStatus::new(backend_id, status));
        }
        list
    }

    /// Insert or replace the entry for `status.backend_id`
    pub fn set(&mut self, status: BackendStatus) {
        match self.0.iter_mut().find(|s| s.backend_id == status.backend_id) {
            Some(existing) => *existing = status,
            None => self.0.push(status),
        }
    }

    /// Change the status of every listed backend
    pub fn set_all(&mut self, status: TaskStatus) {
        for entry in &mut self.0 {
            entry.status = status;
        }
    }

    pub fn get(&self, backend_id: BackendId) -> Option<&BackendStatus> {
        self.0.iter().find(|s| s.backend_id == backend_id)
    }

    pub fn contains(&self, backend_id: BackendId) -> bool {
        self.get(backend_id).is_some()
    }

    pub fn remove(&mut self, backend_id: BackendId) -> Option<BackendStatus> {
        let index = self.0.iter().position(|s| s.backend_id == backend_id)?;
        Some(self.0.remove(index))
    }

    /// Entries currently in `status`
    pub fn filter(&self, status: TaskStatus) -> Self {
        Self(self.0.iter().filter(|s| s.status == status).cloned().collect())
    }

    pub fn backend_ids(&self) -> Vec<BackendId> {
        self.0.iter().map(|s| s.backend_id).collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BackendStatus> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Combined status of all entries, `None` when the list is empty
    pub fn combined(&self) -> Option<TaskStatus> {
        combine(self.0.iter().map(|s| s.status))
    }
}

impl FromIterator<BackendStatus> for BackendStatusList {
    fn from_iter<T: IntoIterator<Item = BackendStatus>>(iter: T) -> Self {
        let mut list = Self::new();
        for status in iter {
            list.set(status);
        }
        list
    }
}

impl IntoIterator for BackendStatusList {
    type Item = BackendStatus;
    type IntoIter = std::vec::IntoIter<BackendStatus>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a BackendStatusList {
    type Item = &'a BackendStatus;
    type IntoIter = std::slice::Iter<'a, BackendStatus>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
