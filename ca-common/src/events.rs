//! Event types for task notifications
//!
//! Provides the event enum and the EventBus used to publish task state changes.
//! The bus is owned by the service state and handed to the components that
//! publish; there is no process-wide instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{BackendId, TaskId, TaskStatus, TaskType};

/// Content-analysis event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CaEvent {
    /// A backend's status for a task was settled by a completion callback
    ///
    /// Published exactly once per ingested callback, on success and on failure.
    TaskStatusChanged {
        backend_id: BackendId,
        task_id: TaskId,
        task_type: TaskType,
        status: TaskStatus,
        timestamp: DateTime<Utc>,
    },

    /// A task was persisted and queued for delivery
    TaskScheduled {
        task_id: TaskId,
        task_type: TaskType,
        backend_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl CaEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            CaEvent::TaskStatusChanged { task_id, .. } | CaEvent::TaskScheduled { task_id, .. } => {
                *task_id
            }
        }
    }

    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            CaEvent::TaskStatusChanged { .. } => "TaskStatusChanged",
            CaEvent::TaskScheduled { .. } => "TaskScheduled",
        }
    }
}

/// Broadcast channel for [`CaEvent`]s
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CaEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before slow receivers lag
    ///
    /// # Examples
    ///
    /// ```
    /// use ca_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<CaEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: CaEvent) -> Result<usize, broadcast::error::SendError<CaEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: CaEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_event(task_id: TaskId) -> CaEvent {
        CaEvent::TaskStatusChanged {
            backend_id: 2,
            task_id,
            task_type: TaskType::Analysis,
            status: TaskStatus::Completed,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        assert_eq!(bus.emit(status_event(9)).unwrap(), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.task_id(), 9);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert!(bus.emit(status_event(1)).is_err());
        bus.emit_lossy(status_event(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(status_event(3)).unwrap();
        assert_eq!(json["type"], "TaskStatusChanged");
        assert_eq!(json["status"], "COMPLETED");
        assert_eq!(json["task_type"], "ANALYSIS");
    }
}
