//! Event sink trait and implementations.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, info, Level};

use crate::core::{TaskId, TaskState};
use crate::utils::{now_utc, Timestamp};

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// The task was registered as Pending.
    Submitted,
    /// The task moved to another state.
    StateChanged,
    /// The progress message changed.
    Progress,
    /// An artifact was produced or reused.
    Artifact,
    /// A stop was requested.
    StopRequested,
    /// The record was evicted by the retention policy.
    Evicted,
}

impl TaskEventKind {
    /// Dotted event type, e.g. `task.state_changed`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "task.submitted",
            Self::StateChanged => "task.state_changed",
            Self::Progress => "task.progress",
            Self::Artifact => "task.artifact",
            Self::StopRequested => "task.stop_requested",
            Self::Evicted => "task.evicted",
        }
    }
}

impl fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task the event belongs to.
    pub task_id: TaskId,
    /// Event kind.
    pub kind: TaskEventKind,
    /// State after the change.
    pub state: TaskState,
    /// Progress message after the change.
    pub message: String,
    /// When the change was applied.
    pub timestamp: Timestamp,
}

impl TaskEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        kind: TaskEventKind,
        state: TaskState,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            kind,
            state,
            message: message.into(),
            timestamp: now_utc(),
        }
    }
}

/// Trait for event sinks that can receive task events.
///
/// Sinks are called from the registry after its lock is released and must
/// never block or panic. Errors are logged but suppressed.
pub trait EventSink: Send + Sync {
    /// Emits an event without blocking.
    fn try_emit(&self, event: &TaskEvent);
}

/// A no-op event sink that discards all events.
///
/// Used as the default when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn try_emit(&self, _event: &TaskEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }
}

impl EventSink for LoggingEventSink {
    fn try_emit(&self, event: &TaskEvent) {
        if self.level == Level::DEBUG {
            debug!(
                task_id = %event.task_id,
                event_type = %event.kind,
                state = %event.state,
                "{}", event.message
            );
        } else {
            info!(
                task_id = %event.task_id,
                event_type = %event.kind,
                state = %event.state,
                "{}", event.message
            );
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<TaskEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events of one kind.
    #[must_use]
    pub fn events_of_kind(&self, kind: TaskEventKind) -> Vec<TaskEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    /// States a task went through, in order, without repeats.
    #[must_use]
    pub fn states_of(&self, task_id: TaskId) -> Vec<TaskState> {
        let mut states: Vec<TaskState> = Vec::new();
        for event in self.events.read().iter().filter(|e| e.task_id == task_id) {
            if states.last() != Some(&event.state) {
                states.push(event.state);
            }
        }
        states
    }
}

impl EventSink for CollectingEventSink {
    fn try_emit(&self, event: &TaskEvent) {
        self.events.write().push(event.clone());
    }
}

/// Fans events out to any number of live subscribers.
///
/// Slow subscribers lag and lose the oldest events; the registry stays
/// authoritative.
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<TaskEvent>,
}

impl BroadcastEventSink {
    /// Creates a sink buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for BroadcastEventSink {
    fn try_emit(&self, event: &TaskEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event.clone());
    }
}
