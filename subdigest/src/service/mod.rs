//! The digest service: job queue, worker pool and status façade.
//!
//! ```rust,ignore
//! let service = DigestService::builder()
//!     .config(EngineConfig::default().with_workers(2))
//!     .source(Arc::new(source))
//!     .enrichment(Arc::new(enrichment))
//!     .build()?;
//!
//! let id = service.submit(TaskRequest::new(url, "subtitles", "default"))?;
//! let status = service.wait_for(id, Duration::from_millis(500)).await?;
//! ```

mod worker;

use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use self::worker::{worker_loop, QueueMessage, SharedReceiver};
use crate::clients::{ArtifactStore, EnrichmentClient, FsArtifactStore, SourceClient};
use crate::config::EngineConfig;
use crate::core::{TaskDescriptor, TaskId, TaskRequest, TaskState, TaskStatus};
use crate::errors::{DigestError, Result};
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::{PipelineDeps, ResilientCaller};
use crate::registry::{InMemoryTaskRegistry, StatusUpdate, TaskRegistry};

enum PoolState {
    Idle,
    Running(Vec<JoinHandle<()>>),
    ShutDown,
}

struct Inner {
    config: EngineConfig,
    deps: Arc<PipelineDeps>,
    sender: UnboundedSender<QueueMessage>,
    receiver: SharedReceiver,
    pool: Mutex<PoolState>,
}

/// Bounded-concurrency job engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DigestService {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DigestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestService")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl DigestService {
    /// Starts building a service.
    #[must_use]
    pub fn builder() -> DigestServiceBuilder {
        DigestServiceBuilder::default()
    }

    /// Engine settings.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The registry backing this service.
    #[must_use]
    pub fn registry(&self) -> Arc<dyn TaskRegistry> {
        Arc::clone(&self.inner.deps.registry)
    }

    /// Source caller (for inspecting retry counters).
    #[must_use]
    pub fn source_caller(&self) -> &ResilientCaller {
        &self.inner.deps.source_caller
    }

    /// Enqueues a task and returns its id.
    ///
    /// The Pending record exists before this returns. Starts the worker
    /// pool on first use, so it must be called inside a Tokio runtime.
    pub fn submit(&self, request: TaskRequest) -> Result<TaskId> {
        let descriptor = TaskDescriptor::from_request(request);
        let id = descriptor.id;

        let mut pool = self.inner.pool.lock();
        if matches!(*pool, PoolState::ShutDown) {
            return Err(DigestError::ShutDown);
        }
        self.start_locked(&mut pool)?;

        self.inner.deps.registry.register(&descriptor);
        if self.inner.sender.send(QueueMessage::Task(descriptor)).is_err() {
            let _ = self.inner.deps.registry.apply(
                id,
                StatusUpdate::Fail {
                    error: DigestError::ShutDown.to_string(),
                },
            );
            return Err(DigestError::ShutDown);
        }

        info!(task_id = %id, "Task submitted");
        Ok(id)
    }

    /// Submits several requests in order. Stops at the first error.
    pub fn submit_batch(
        &self,
        requests: impl IntoIterator<Item = TaskRequest>,
    ) -> Result<Vec<TaskId>> {
        requests.into_iter().map(|r| self.submit(r)).collect()
    }

    /// Spawns the worker pool. Returns true if this call started it; later
    /// calls are no-ops.
    pub fn start_pool(&self) -> Result<bool> {
        let mut pool = self.inner.pool.lock();
        if matches!(*pool, PoolState::ShutDown) {
            return Err(DigestError::ShutDown);
        }
        self.start_locked(&mut pool)
    }

    fn start_locked(&self, pool: &mut PoolState) -> Result<bool> {
        if !matches!(pool, PoolState::Idle) {
            return Ok(false);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DigestError::Config(format!("worker pool needs a Tokio runtime: {e}")))?;

        let workers = self.inner.config.workers.max(1);
        let handles = (0..workers)
            .map(|worker| {
                runtime.spawn(worker_loop(
                    worker,
                    Arc::clone(&self.inner.receiver),
                    Arc::clone(&self.inner.deps),
                    self.inner.config.cooldown(),
                ))
            })
            .collect();
        *pool = PoolState::Running(handles);

        info!(workers, "Worker pool started");
        Ok(true)
    }

    /// Returns true once the pool has been started and not shut down.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.inner.pool.lock(), PoolState::Running(_))
    }

    /// Returns one task's status.
    pub fn get(&self, id: TaskId) -> Result<TaskStatus> {
        self.inner
            .deps
            .registry
            .get(id)
            .ok_or(DigestError::TaskNotFound(id))
    }

    /// Returns every known task, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<TaskStatus> {
        self.inner.deps.registry.list()
    }

    /// Requests a cooperative stop. Fails for terminal tasks.
    pub fn request_stop(&self, id: TaskId) -> Result<TaskStatus> {
        let status = self.inner.deps.registry.request_stop(id)?;
        info!(task_id = %id, "Stop requested");
        Ok(status)
    }

    /// Requests a stop for every non-terminal task. Returns how many were
    /// asked to stop.
    pub fn stop_all(&self) -> usize {
        self.list()
            .into_iter()
            .filter(|s| !s.is_terminal())
            .filter(|s| self.request_stop(s.id).is_ok())
            .count()
    }

    /// Polls until the task reaches a terminal state.
    pub async fn wait_for(&self, id: TaskId, poll: Duration) -> Result<TaskStatus> {
        loop {
            let status = self.get(id)?;
            if status.is_terminal() {
                return Ok(status);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Polls until every listed task is terminal.
    pub async fn wait_all(&self, ids: &[TaskId], poll: Duration) -> Result<Vec<TaskStatus>> {
        let mut done = Vec::with_capacity(ids.len());
        for id in ids {
            done.push(self.wait_for(*id, poll).await?);
        }
        Ok(done)
    }

    /// Polls the listed tasks until all are terminal, calling `on_change`
    /// whenever a task's state or message differs from the last poll.
    pub async fn watch<F>(
        &self,
        ids: &[TaskId],
        poll: Duration,
        mut on_change: F,
    ) -> Result<Vec<TaskStatus>>
    where
        F: FnMut(&TaskStatus),
    {
        let mut seen: HashMap<TaskId, (TaskState, String)> = HashMap::with_capacity(ids.len());
        loop {
            let mut statuses = Vec::with_capacity(ids.len());
            for id in ids {
                let status = self.get(*id)?;
                let current = (status.state, status.message.clone());
                if seen.get(id) != Some(&current) {
                    on_change(&status);
                    seen.insert(*id, current);
                }
                statuses.push(status);
            }
            if statuses.iter().all(TaskStatus::is_terminal) {
                return Ok(statuses);
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Stops accepting work, lets workers drain the queue, and waits for
    /// them to exit. One sentinel per worker is queued behind pending work.
    pub async fn shutdown(&self) {
        let handles = {
            let mut pool = self.inner.pool.lock();
            match std::mem::replace(&mut *pool, PoolState::ShutDown) {
                PoolState::Running(handles) => handles,
                PoolState::Idle | PoolState::ShutDown => Vec::new(),
            }
        };
        if handles.is_empty() {
            return;
        }

        for _ in 0..handles.len() {
            if self.inner.sender.send(QueueMessage::Shutdown).is_err() {
                warn!("Queue closed before shutdown sentinels were sent");
                break;
            }
        }

        for result in join_all(handles).await {
            if let Err(err) = result {
                error!(error = %err, "Worker exited abnormally");
            }
        }
        info!("Worker pool shut down");
    }
}

/// Builder for [`DigestService`].
#[derive(Default)]
pub struct DigestServiceBuilder {
    config: EngineConfig,
    source: Option<Arc<dyn SourceClient>>,
    enrichment: Option<Arc<dyn EnrichmentClient>>,
    store: Option<Arc<dyn ArtifactStore>>,
    registry: Option<Arc<dyn TaskRegistry>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl DigestServiceBuilder {
    /// Sets the engine settings.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the video source (required).
    #[must_use]
    pub fn source(mut self, source: Arc<dyn SourceClient>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the enrichment backend (required).
    #[must_use]
    pub fn enrichment(mut self, enrichment: Arc<dyn EnrichmentClient>) -> Self {
        self.enrichment = Some(enrichment);
        self
    }

    /// Sets the artifact store. Defaults to the filesystem.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Supplies a registry. Defaults to an in-memory registry using the
    /// configured retention and event sink.
    #[must_use]
    pub fn registry(mut self, registry: Arc<dyn TaskRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the event sink of the default registry.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the service. The pool starts on first submission.
    pub fn build(self) -> Result<DigestService> {
        let source = self
            .source
            .ok_or_else(|| DigestError::Config("a source client is required".to_string()))?;
        let enrichment = self
            .enrichment
            .ok_or_else(|| DigestError::Config("an enrichment client is required".to_string()))?;
        let store = self.store.unwrap_or_else(|| Arc::new(FsArtifactStore::new()));
        let config = self.config;

        let registry = match self.registry {
            Some(registry) => registry,
            None => {
                let sink = self.sink.unwrap_or_else(|| Arc::new(NoOpEventSink));
                Arc::new(InMemoryTaskRegistry::with_sink(config.retention, sink))
            }
        };

        let deps = Arc::new(PipelineDeps {
            registry,
            source,
            enrichment,
            store,
            source_caller: Arc::new(ResilientCaller::new("source", config.source_retry.clone())),
            enrichment_caller: Arc::new(ResilientCaller::new(
                "enrichment",
                config.enrichment_retry.clone(),
            )),
        });

        let (sender, receiver) = mpsc::unbounded_channel();
        Ok(DigestService {
            inner: Arc::new(Inner {
                config,
                deps,
                sender,
                receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
                pool: Mutex::new(PoolState::Idle),
            }),
        })
    }
}
