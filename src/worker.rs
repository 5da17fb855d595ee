//! Queue consumer that drives tasks from `CREATED` to `DONE` or `ERROR`.
//!
//! One task is in flight at a time. Delivery is at-least-once, so every entry
//! is resolved against the task store before any external call is made.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::task::{Task, TaskStatus};
use crate::services::generation::{build_prompt, GenerationError, ImageGenerator};
use crate::services::queue::WorkQueue;
use crate::services::storage::{ArtifactStore, StorageError};
use crate::services::store::{StoreError, TaskStore};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// How long one `dequeue` blocks; also bounds how quickly an idle worker notices shutdown.
    pub dequeue_timeout: Duration,
    /// Grace period for the in-flight task once shutdown is requested.
    pub drain_timeout: Duration,
    /// Pause after a queue or store outage.
    pub retry_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            dequeue_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Why an entry was discarded without touching the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Entry is not a task id.
    Malformed,
    /// No task with this id exists.
    Stale,
    /// Task was already `DONE` or `ERROR` when loaded.
    AlreadyTerminal,
    /// Another worker instance moved the task on before this one could.
    Claimed,
}

impl DropReason {
    fn as_str(self) -> &'static str {
        match self {
            DropReason::Malformed => "malformed",
            DropReason::Stale => "stale",
            DropReason::AlreadyTerminal => "already_terminal",
            DropReason::Claimed => "claimed",
        }
    }
}

/// Result of handling one queue entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Done { locator: String },
    Failed,
    Dropped(DropReason),
    /// The terminal write failed; the task is left `IN_PROGRESS`.
    Stuck,
    /// The store was unreachable before the task was claimed; try again later.
    Deferred,
}

impl ProcessOutcome {
    /// Whether the queue entry should be acknowledged.
    pub fn is_settled(&self) -> bool {
        !matches!(self, ProcessOutcome::Deferred)
    }
}

/// Failure between claiming a task and recording its result.
#[derive(Debug, thiserror::Error)]
enum PipelineError {
    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("artifact upload failed: {0}")]
    Storage(#[from] StorageError),

    #[error("recording result failed: {0}")]
    Store(#[from] StoreError),

    #[error("processing aborted unexpectedly: {0}")]
    Aborted(String),
}

pub struct TaskWorker {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn WorkQueue>,
    generator: Arc<dyn ImageGenerator>,
    artifacts: Arc<dyn ArtifactStore>,
    settings: WorkerSettings,
}

impl TaskWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn WorkQueue>,
        generator: Arc<dyn ImageGenerator>,
        artifacts: Arc<dyn ArtifactStore>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            queue,
            generator,
            artifacts,
            settings,
        }
    }

    /// Consume the queue until `shutdown` is cancelled.
    ///
    /// Entries left unacknowledged by a previous run are put back first. A task
    /// in flight when shutdown arrives gets `drain_timeout` to finish; past
    /// that it is abandoned `IN_PROGRESS` and its entry stays unacknowledged.
    pub async fn run(&self, shutdown: CancellationToken) {
        match self.queue.recover_in_flight().await {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::warn!(recovered, "Re-queued entries left in flight by a previous worker")
            }
            Err(e) => tracing::error!(error = %e, "Failed to recover in-flight entries"),
        }

        tracing::info!(
            dequeue_timeout_ms = self.settings.dequeue_timeout.as_millis() as u64,
            "Worker ready, starting task processing loop"
        );

        while !shutdown.is_cancelled() {
            let entry = match self.queue.dequeue(self.settings.dequeue_timeout).await {
                Ok(Some(entry)) => entry,
                Ok(None) => {
                    tracing::trace!("No tasks available");
                    self.report_depth().await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Queue error, backing off");
                    self.backoff(&shutdown).await;
                    continue;
                }
            };

            let processing = self.process(&entry);
            tokio::pin!(processing);

            let outcome = tokio::select! {
                outcome = &mut processing => outcome,
                () = drain_deadline(&shutdown, self.settings.drain_timeout) => {
                    metrics::counter!("tasks_stuck_total").increment(1);
                    tracing::error!(
                        alert = true,
                        fault = "stuck_in_progress",
                        entry = %entry,
                        "Shutdown interrupted an in-flight task; it stays IN_PROGRESS until redelivered"
                    );
                    break;
                }
            };

            if outcome.is_settled() {
                if let Err(e) = self.queue.ack(&entry).await {
                    tracing::warn!(entry = %entry, error = %e, "Failed to acknowledge queue entry");
                }
            } else {
                if let Err(e) = self.queue.release(&entry).await {
                    tracing::error!(entry = %entry, error = %e, "Failed to release queue entry");
                }
                self.backoff(&shutdown).await;
            }

            self.report_depth().await;
        }

        tracing::info!("Worker stopped");
    }

    /// Handle one queue entry end to end.
    pub async fn process(&self, entry: &str) -> ProcessOutcome {
        let task_id = match Uuid::parse_str(entry.trim()) {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(entry = %entry, "Dropping queue entry that is not a task id");
                return dropped(DropReason::Malformed);
            }
        };

        let task = match self.store.get(task_id).await {
            Ok(task) => task,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(task_id = %task_id, "Task not found, dropping stale entry");
                return dropped(DropReason::Stale);
            }
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to load task");
                return ProcessOutcome::Deferred;
            }
        };

        if task.status.is_terminal() {
            tracing::info!(
                task_id = %task_id,
                status = %task.status,
                "Task already finished, ignoring redelivery"
            );
            return dropped(DropReason::AlreadyTerminal);
        }

        // Claim before any external call so a concurrent redelivery sees IN_PROGRESS.
        match self
            .store
            .update_status(task_id, TaskStatus::InProgress, None)
            .await
        {
            Ok(()) => {}
            Err(StoreError::Conflict { from, .. }) => {
                tracing::info!(task_id = %task_id, status = %from, "Task moved on elsewhere, dropping");
                return dropped(DropReason::Claimed);
            }
            Err(StoreError::NotFound(_)) => return dropped(DropReason::Stale),
            Err(e) => {
                tracing::error!(task_id = %task_id, error = %e, "Failed to mark task IN_PROGRESS");
                return ProcessOutcome::Deferred;
            }
        }

        tracing::info!(
            task_id = %task_id,
            animal = %task.animal,
            text = %task.text,
            "Processing task"
        );

        let started = Instant::now();
        let outcome = match self.execute(task).await {
            Ok(locator) => {
                metrics::counter!("tasks_completed_total").increment(1);
                tracing::info!(task_id = %task_id, image_uri = %locator, "Task completed successfully");
                ProcessOutcome::Done { locator }
            }
            Err(e) => self.fail(task_id, e).await,
        };
        metrics::histogram!("task_processing_seconds").record(started.elapsed().as_secs_f64());

        outcome
    }

    /// Generate, upload and record `DONE`. Runs on its own task so a panic in
    /// a collaborator fails this task instead of the loop. Dropping the returned
    /// future aborts the pipeline.
    async fn execute(&self, task: Task) -> Result<String, PipelineError> {
        let store = Arc::clone(&self.store);
        let generator = Arc::clone(&self.generator);
        let artifacts = Arc::clone(&self.artifacts);

        let mut pipeline = AbortOnDrop(tokio::spawn(async move {
            let prompt = build_prompt(&task.animal, &task.text);

            let generation_start = Instant::now();
            let image = generator.generate(&prompt).await?;
            tracing::debug!(
                task_id = %task.id,
                generation_ms = generation_start.elapsed().as_millis() as u64,
                bytes = image.len(),
                "Image generated"
            );

            let locator = artifacts.put(task.id, &image).await?;

            store
                .update_status(task.id, TaskStatus::Done, Some(&locator))
                .await
                .inspect_err(|e| {
                    tracing::error!(
                        task_id = %task.id,
                        orphaned_image = %locator,
                        error = %e,
                        "Uploaded image could not be recorded"
                    )
                })?;

            Ok::<_, PipelineError>(locator)
        }));

        match (&mut pipeline.0).await {
            Ok(result) => result,
            Err(join_error) => Err(PipelineError::Aborted(join_error.to_string())),
        }
    }

    /// Record `ERROR` after a pipeline failure.
    async fn fail(&self, task_id: Uuid, cause: PipelineError) -> ProcessOutcome {
        tracing::error!(task_id = %task_id, error = %cause, "Task processing failed");

        match self
            .store
            .update_status(task_id, TaskStatus::Error, None)
            .await
        {
            Ok(()) => {
                metrics::counter!("tasks_failed_total").increment(1);
                ProcessOutcome::Failed
            }
            Err(StoreError::Conflict { from, .. }) => {
                tracing::info!(task_id = %task_id, status = %from, "Task already finished elsewhere");
                dropped(DropReason::Claimed)
            }
            Err(e) => {
                metrics::counter!("tasks_stuck_total").increment(1);
                tracing::error!(
                    alert = true,
                    fault = "stuck_in_progress",
                    task_id = %task_id,
                    error = %e,
                    "Failed to mark task as ERROR; it stays IN_PROGRESS"
                );
                ProcessOutcome::Stuck
            }
        }
    }

    async fn report_depth(&self) {
        if let Ok(depth) = self.queue.depth().await {
            metrics::gauge!("task_queue_depth").set(depth as f64);
        }
    }

    async fn backoff(&self, shutdown: &CancellationToken) {
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = sleep(self.settings.retry_backoff) => {}
        }
    }
}

/// Aborts the spawned pipeline when an abandoned `process` future is dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn dropped(reason: DropReason) -> ProcessOutcome {
    metrics::counter!("tasks_dropped_total", "reason" => reason.as_str()).increment(1);
    ProcessOutcome::Dropped(reason)
}

/// Resolves `grace` after `shutdown` is cancelled.
async fn drain_deadline(shutdown: &CancellationToken, grace: Duration) {
    shutdown.cancelled().await;
    sleep(grace).await;
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C), finishing in-flight task"),
        () = terminate => tracing::info!("Received SIGTERM, finishing in-flight task"),
    }
}
