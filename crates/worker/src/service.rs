//! The facade collaborators use to request derived artifacts.
//!
//! [`MediaJobService`] ties the registry, queue, worker pool and event hub
//! together:
//!
//! ```text
//! submit ─► registry.try_begin ─► store.exists? ─► queue.enqueue ─► worker
//!                                                                   │
//!        waiters ◄── registry.complete / fail ◄── render + persist ◄┘
//!                                   │
//!                                   └──► hub.publish
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use artifex_core::config::JobSystemConfig;
use artifex_core::error::JobError;
use artifex_core::job::{JobKind, JobRequest, JobStatusView};
use artifex_core::keys::TargetKey;
use artifex_core::render::Renderer;
use artifex_core::storage::ArtifactStore;
use artifex_core::types::JobId;
use artifex_events::EventHub;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::pool::{WorkerContext, WorkerPool};
use crate::queue::{QueuedJob, WorkQueue};
use crate::registry::{self, BeginOutcome, Join, JobOutcome, JobRegistry};

/// What happened to a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SubmissionResult {
    /// A new job was queued.
    Accepted { job_id: JobId },
    /// A job for the same key is already Pending or Running; join or poll it.
    AlreadyInProgress { job_id: JobId },
    /// The artifact already exists; nothing was queued.
    Completed { path: PathBuf },
    /// The key is already bound to a job of another kind.
    KindConflict { existing: JobKind },
    /// The queue is saturated; retry later.
    QueueFull { capacity: usize },
    /// The service has stopped admitting work.
    ShuttingDown,
}

/// What a waiting caller learned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Completed(PathBuf),
    Failed(JobError),
    /// The caller stopped waiting; the job itself is unaffected.
    TimedOut,
    /// No job is known under the key.
    NotFound,
}

impl From<JobOutcome> for WaitOutcome {
    fn from(outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Completed(path) => WaitOutcome::Completed(path),
            JobOutcome::Failed(error) => WaitOutcome::Failed(error),
        }
    }
}

pub struct MediaJobService {
    context: Arc<WorkerContext>,
    queue: Arc<WorkQueue>,
    pool: Mutex<Option<WorkerPool>>,
    num_workers: usize,
    shutdown_grace: Duration,
    cancel: CancellationToken,
}

impl MediaJobService {
    /// Build the service and spawn its worker pool and registry janitor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: &JobSystemConfig,
        store: Arc<dyn ArtifactStore>,
        renderer: Arc<dyn Renderer>,
        hub: EventHub,
    ) -> Arc<Self> {
        let registry = Arc::new(JobRegistry::new(config.completed_ttl));
        let queue = Arc::new(WorkQueue::new(config.queue_size));
        let cancel = CancellationToken::new();

        let context = Arc::new(WorkerContext {
            registry: Arc::clone(&registry),
            store,
            renderer,
            hub,
        });

        let pool = WorkerPool::start(
            config.num_workers,
            queue.receiver(),
            Arc::clone(&context),
            cancel.child_token(),
        );
        let num_workers = pool.size();

        tokio::spawn(registry::run_janitor(
            registry,
            config.sweep_interval,
            cancel.child_token(),
        ));

        tracing::info!(
            num_workers,
            queue_size = queue.capacity(),
            ttl_secs = config.completed_ttl.as_secs(),
            "Media job service started"
        );

        Arc::new(Self {
            context,
            queue,
            pool: Mutex::new(Some(pool)),
            num_workers,
            shutdown_grace: config.shutdown_grace,
            cancel,
        })
    }

    /// Request the artifact described by `request`.
    ///
    /// Never blocks on queue space. An existing artifact is returned as
    /// [`SubmissionResult::Completed`] without queuing anything.
    pub fn submit(&self, request: JobRequest) -> SubmissionResult {
        self.submit_inner(request, false)
    }

    /// Like [`submit`](Self::submit), but supersede a Completed result and
    /// re-render even if the artifact exists. An active job for the key is
    /// still joined rather than duplicated.
    pub fn regenerate(&self, request: JobRequest) -> SubmissionResult {
        self.submit_inner(request, true)
    }

    fn submit_inner(&self, request: JobRequest, regenerate: bool) -> SubmissionResult {
        if self.queue.is_closed() {
            return SubmissionResult::ShuttingDown;
        }

        let registry = &self.context.registry;
        let record = match registry.try_begin(&request.key, request.kind, regenerate) {
            BeginOutcome::InProgress(record) => {
                tracing::debug!(key = %request.key, job_id = %record.id, "Joining job in progress");
                return SubmissionResult::AlreadyInProgress { job_id: record.id };
            }
            BeginOutcome::Cached(record) => match record.result_path {
                Some(path) => return SubmissionResult::Completed { path },
                None => return SubmissionResult::AlreadyInProgress { job_id: record.id },
            },
            BeginOutcome::KindConflict(record) => {
                tracing::warn!(
                    key = %request.key,
                    requested = %request.kind,
                    existing = %record.kind,
                    "Target key already bound to another job kind"
                );
                return SubmissionResult::KindConflict {
                    existing: record.kind,
                };
            }
            BeginOutcome::Started(record) => record,
        };

        // This caller now owns the key; the store can be checked without racing
        // another writer.
        if !regenerate && self.context.store.exists(request.kind, &request.key) {
            let path = self.context.store.put(request.kind, &request.key);
            registry.complete(&request.key, record.id, path.clone());
            tracing::debug!(key = %request.key, path = %path.display(), "Artifact already stored");
            return SubmissionResult::Completed { path };
        }

        let key = request.key.clone();
        let job = QueuedJob {
            job_id: record.id,
            request,
        };
        match self.queue.enqueue(job) {
            Ok(()) => {
                tracing::info!(job_id = %record.id, kind = %record.kind, key = %key, "Job queued");
                SubmissionResult::Accepted { job_id: record.id }
            }
            Err(error) => {
                tracing::warn!(key = %key, error = %error, "Job rejected");
                registry.discard(&key, record.id, error.clone());
                match error {
                    JobError::QueueFull { capacity } => SubmissionResult::QueueFull { capacity },
                    _ => SubmissionResult::ShuttingDown,
                }
            }
        }
    }

    /// Current state of the job for `key`.
    pub fn get_status(&self, key: &TargetKey) -> JobStatusView {
        self.context
            .registry
            .get(key)
            .map(|record| JobStatusView::from(&record))
            .unwrap_or(JobStatusView::NotFound)
    }

    /// Wait up to `timeout` for the job under `key` to finish.
    ///
    /// Timing out only releases this caller; the job keeps running for
    /// everyone else.
    pub async fn wait(&self, key: &TargetKey, timeout: Duration) -> WaitOutcome {
        self.wait_until(key, tokio::time::sleep(timeout)).await
    }

    /// Wait for the job under `key` until it finishes or `cancel` fires.
    pub async fn wait_cancellable(&self, key: &TargetKey, cancel: CancellationToken) -> WaitOutcome {
        self.wait_until(key, cancel.cancelled_owned()).await
    }

    async fn wait_until<F>(&self, key: &TargetKey, give_up: F) -> WaitOutcome
    where
        F: std::future::Future<Output = ()>,
    {
        let receiver = match self.context.registry.join(key) {
            None => return WaitOutcome::NotFound,
            Some(Join::Finished(outcome)) => return outcome.into(),
            Some(Join::Waiting(receiver)) => receiver,
        };

        tokio::select! {
            outcome = receiver => match outcome {
                Ok(outcome) => outcome.into(),
                // Released without an outcome: the record is gone.
                Err(_) => WaitOutcome::NotFound,
            },
            _ = give_up => WaitOutcome::TimedOut,
        }
    }

    pub fn hub(&self) -> &EventHub {
        &self.context.hub
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Admitted jobs not yet picked up by a worker.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Jobs currently Pending or Running.
    pub fn active_jobs(&self) -> usize {
        self.context.registry.active_count()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_closed()
    }

    /// Stop admitting work, fail queued jobs, and let running jobs drain for
    /// the configured grace period. Jobs still active afterwards are failed
    /// with [`JobError::ShutdownAbandoned`].
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn shutdown(&self) {
        let Some(pool) = self.pool.lock().await.take() else {
            return;
        };

        tracing::info!(
            grace_secs = self.shutdown_grace.as_secs(),
            "Media job service shutting down"
        );
        self.queue.close();
        self.cancel.cancel();

        let queued = self.queue.drain().await;
        if !queued.is_empty() {
            tracing::warn!(count = queued.len(), "Failing queued jobs that never started");
        }
        for job in queued {
            let key = &job.request.key;
            if let Some(record) =
                self.context
                    .registry
                    .fail(key, job.job_id, JobError::ShutdownAbandoned)
            {
                self.context.publish(&record);
            }
        }

        pool.shutdown(self.shutdown_grace).await;

        // Whatever is still active was either running past the grace period
        // or admitted while the queue was closing.
        let abandoned = self
            .context
            .registry
            .fail_all_active(JobError::ShutdownAbandoned);
        for record in &abandoned {
            tracing::warn!(
                job_id = %record.id,
                key = %record.target_key,
                "Job abandoned during shutdown"
            );
            self.context.publish(record);
        }

        tracing::info!("Media job service stopped");
    }
}
