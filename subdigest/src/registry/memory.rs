//! In-memory task registry with bounded retention.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{StatusUpdate, TaskRegistry};
use crate::cancellation::CancellationToken;
use crate::core::{TaskDescriptor, TaskId, TaskState, TaskStatus};
use crate::errors::{DigestError, Result};
use crate::events::{EventSink, NoOpEventSink, TaskEvent, TaskEventKind};
use crate::utils::{now_utc, Timestamp};

/// How long finished records are kept.
///
/// Only terminal records are ever evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Terminal records older than this are dropped.
    pub ttl_secs: u64,
    /// Soft cap on the number of records; oldest terminal records go first.
    pub max_records: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_records: 1000,
        }
    }
}

impl RetentionPolicy {
    /// The TTL as a Duration.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

struct Entry {
    status: TaskStatus,
    token: Arc<CancellationToken>,
}

/// Registry backed by a `HashMap` behind a single `RwLock`.
///
/// Events are emitted after the lock is released.
pub struct InMemoryTaskRegistry {
    records: RwLock<HashMap<TaskId, Entry>>,
    retention: RetentionPolicy,
    sink: Arc<dyn EventSink>,
}

impl Default for InMemoryTaskRegistry {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}

impl std::fmt::Debug for InMemoryTaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTaskRegistry")
            .field("records", &self.records.read().len())
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl InMemoryTaskRegistry {
    /// Creates a registry that discards events.
    #[must_use]
    pub fn new(retention: RetentionPolicy) -> Self {
        Self::with_sink(retention, Arc::new(NoOpEventSink))
    }

    /// Creates a registry publishing every accepted change to `sink`.
    #[must_use]
    pub fn with_sink(retention: RetentionPolicy, sink: Arc<dyn EventSink>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            retention,
            sink,
        }
    }

    /// Number of records currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Removes expired records, then the oldest terminal records while the
    /// map plus `reserve` new slots exceeds the cap.
    fn evict_locked(
        &self,
        records: &mut HashMap<TaskId, Entry>,
        reserve: usize,
        now: Timestamp,
    ) -> Vec<TaskEvent> {
        let ttl = self.retention.ttl();
        let mut evicted = Vec::new();

        records.retain(|id, entry| {
            let expired = entry.status.is_terminal()
                && entry
                    .status
                    .completed_at
                    .is_some_and(|at| (now - at).to_std().is_ok_and(|age| age >= ttl));
            if expired {
                evicted.push(eviction_event(*id, &entry.status));
            }
            !expired
        });

        let overflow = (records.len() + reserve).saturating_sub(self.retention.max_records);
        if overflow > 0 {
            let mut terminal: Vec<(Timestamp, TaskId)> = records
                .iter()
                .filter(|(_, entry)| entry.status.is_terminal())
                .map(|(id, entry)| {
                    (
                        entry.status.completed_at.unwrap_or(entry.status.created_at),
                        *id,
                    )
                })
                .collect();
            terminal.sort();

            for (_, id) in terminal.into_iter().take(overflow) {
                if let Some(entry) = records.remove(&id) {
                    evicted.push(eviction_event(id, &entry.status));
                }
            }
        }

        evicted
    }

    fn emit_all(&self, events: &[TaskEvent]) {
        for event in events {
            self.sink.try_emit(event);
        }
    }
}

fn eviction_event(id: TaskId, status: &TaskStatus) -> TaskEvent {
    TaskEvent::new(id, TaskEventKind::Evicted, status.state, "Record evicted")
}

/// Applies one update to a record. `Ok(None)` means the update was ignored.
fn apply_update(status: &mut TaskStatus, update: StatusUpdate) -> Result<Option<TaskEventKind>> {
    let current = status.state;
    let task_id = status.id;
    let rejected = move |to: TaskState| DigestError::InvalidTransition {
        task_id,
        from: current,
        to,
    };

    let kind = match update {
        StatusUpdate::Transition { state, message } => {
            if !current.can_transition_to(state) {
                return Err(rejected(state));
            }
            if state == TaskState::Downloading && status.started_at.is_none() {
                status.started_at = Some(now_utc());
            }
            status.state = state;
            status.message = message;
            if current == state {
                TaskEventKind::Progress
            } else {
                TaskEventKind::StateChanged
            }
        }
        StatusUpdate::Progress { message } => {
            if current == TaskState::Stopping || current.is_terminal() {
                return Ok(None);
            }
            status.message = message;
            TaskEventKind::Progress
        }
        StatusUpdate::Resource { title, output_dir } => {
            if current.is_terminal() {
                return Err(rejected(current));
            }
            status.title = Some(title);
            status.output_dir = Some(output_dir);
            TaskEventKind::Progress
        }
        StatusUpdate::Artifact {
            unit,
            transcript,
            record,
        } => {
            if current.is_terminal() {
                return Err(rejected(current));
            }
            status.results.record(&unit, &transcript, record);
            TaskEventKind::Artifact
        }
        StatusUpdate::Complete { message } => {
            finish(status, TaskState::Completed, message).map_err(rejected)?;
            TaskEventKind::StateChanged
        }
        StatusUpdate::Fail { error } => {
            finish(status, TaskState::Failed, format!("Failed: {error}")).map_err(rejected)?;
            status.error = Some(error);
            TaskEventKind::StateChanged
        }
        StatusUpdate::Stopped { message } => {
            finish(status, TaskState::Stopped, message).map_err(rejected)?;
            TaskEventKind::StateChanged
        }
    };

    Ok(Some(kind))
}

fn finish(
    status: &mut TaskStatus,
    state: TaskState,
    message: String,
) -> std::result::Result<(), TaskState> {
    if !status.state.can_transition_to(state) {
        return Err(state);
    }
    status.state = state;
    status.message = message;
    status.completed_at = Some(now_utc());
    Ok(())
}

impl TaskRegistry for InMemoryTaskRegistry {
    fn register(&self, descriptor: &TaskDescriptor) -> TaskStatus {
        let status = TaskStatus::pending(descriptor);
        let evicted = {
            let mut records = self.records.write();
            let evicted = self.evict_locked(&mut records, 1, now_utc());
            records.insert(
                descriptor.id,
                Entry {
                    status: status.clone(),
                    token: Arc::new(CancellationToken::new()),
                },
            );
            evicted
        };

        self.emit_all(&evicted);
        self.sink.try_emit(&TaskEvent::new(
            status.id,
            TaskEventKind::Submitted,
            status.state,
            status.message.clone(),
        ));
        status
    }

    fn get(&self, id: TaskId) -> Option<TaskStatus> {
        self.records.read().get(&id).map(|e| e.status.clone())
    }

    fn list(&self) -> Vec<TaskStatus> {
        let mut all: Vec<TaskStatus> = self
            .records
            .read()
            .values()
            .map(|e| e.status.clone())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    fn request_stop(&self, id: TaskId) -> Result<TaskStatus> {
        let snapshot = {
            let mut records = self.records.write();
            let entry = records.get_mut(&id).ok_or(DigestError::TaskNotFound(id))?;

            if entry.status.is_terminal() {
                return Err(DigestError::InvalidTransition {
                    task_id: id,
                    from: entry.status.state,
                    to: TaskState::Stopping,
                });
            }
            if entry.status.state == TaskState::Stopping {
                return Ok(entry.status.clone());
            }

            entry.status.stop_requested = true;
            entry.status.state = TaskState::Stopping;
            entry.status.message = "Stop requested, finishing current step".to_string();
            // Cancel while holding the lock so any later update that observes
            // Stopping also observes the cancelled token.
            entry.token.cancel("stop requested");
            entry.status.clone()
        };

        self.sink.try_emit(&TaskEvent::new(
            id,
            TaskEventKind::StopRequested,
            snapshot.state,
            snapshot.message.clone(),
        ));
        Ok(snapshot)
    }

    fn stop_token(&self, id: TaskId) -> Option<Arc<CancellationToken>> {
        self.records.read().get(&id).map(|e| Arc::clone(&e.token))
    }

    fn apply(&self, id: TaskId, update: StatusUpdate) -> Result<TaskStatus> {
        let (snapshot, kind) = {
            let mut records = self.records.write();
            let entry = records.get_mut(&id).ok_or(DigestError::TaskNotFound(id))?;
            let kind = apply_update(&mut entry.status, update)?;
            (entry.status.clone(), kind)
        };

        if let Some(kind) = kind {
            self.sink.try_emit(&TaskEvent::new(
                id,
                kind,
                snapshot.state,
                snapshot.message.clone(),
            ));
        }
        Ok(snapshot)
    }

    fn evict_expired(&self) -> usize {
        let evicted = {
            let mut records = self.records.write();
            self.evict_locked(&mut records, 0, now_utc())
        };
        self.emit_all(&evicted);
        evicted.len()
    }
}
