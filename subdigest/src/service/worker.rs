//! Queue messages and the worker loop.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, Instrument};

use crate::core::{TaskDescriptor, TaskId, TaskState, TaskStatus};
use crate::errors::DigestError;
use crate::pipeline::{PipelineDeps, TaskPipeline};
use crate::registry::StatusUpdate;

/// An item on the job queue.
#[derive(Debug)]
pub(crate) enum QueueMessage {
    /// Run this task.
    Task(TaskDescriptor),
    /// Exit the worker loop.
    Shutdown,
}

/// Receiving end of the queue, shared by every worker.
pub(crate) type SharedReceiver = Arc<Mutex<UnboundedReceiver<QueueMessage>>>;

/// Long-lived worker: dequeue, run, cool down, repeat until a shutdown
/// sentinel arrives or the queue closes.
pub(crate) async fn worker_loop(
    worker: usize,
    receiver: SharedReceiver,
    deps: Arc<PipelineDeps>,
    cooldown: Duration,
) {
    info!(worker, "Worker started");

    loop {
        let message = receiver.lock().await.recv().await;
        let task = match message {
            Some(QueueMessage::Task(task)) => task,
            Some(QueueMessage::Shutdown) | None => break,
        };

        let task_id = task.id;
        let span = info_span!("worker", worker, task_id = %task_id);
        info!(worker, task_id = %task_id, resource = %task.resource, "Task picked up");

        // The pipeline runs in its own task so a panic surfaces as a
        // JoinError here instead of unwinding the worker.
        let pipeline = TaskPipeline::new(Arc::clone(&deps), task);
        let ran = match tokio::spawn(pipeline.run().instrument(span)).await {
            Ok(status) => status.as_ref().map_or(true, made_remote_calls),
            Err(join_error) => {
                error!(worker, task_id = %task_id, error = %join_error, "Task crashed");
                record_crash(&deps, task_id, &join_error.to_string());
                true
            }
        };

        if ran && !cooldown.is_zero() {
            tokio::time::sleep(cooldown).await;
        }
    }

    info!(worker, "Worker stopped");
}

/// False for a task stopped before it ever left `Pending`.
pub(crate) fn made_remote_calls(status: &TaskStatus) -> bool {
    status.state != TaskState::Stopped || status.started_at.is_some()
}

fn record_crash(deps: &PipelineDeps, task_id: TaskId, reason: &str) {
    let failed = deps.registry.apply(
        task_id,
        StatusUpdate::Fail {
            error: format!("task crashed: {reason}"),
        },
    );
    if let Err(DigestError::InvalidTransition {
        from: TaskState::Stopping,
        ..
    }) = failed
    {
        let _ = deps.registry.apply(
            task_id,
            StatusUpdate::Stopped {
                message: format!("Stopped by request; task crashed: {reason}"),
            },
        );
    }
}
