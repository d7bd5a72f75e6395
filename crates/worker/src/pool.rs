//! Fixed set of worker tasks draining the [`WorkQueue`](crate::queue::WorkQueue).
//!
//! Each worker loops: dequeue, mark the job Running, render and persist on
//! the blocking pool, then complete or fail the job and publish the matching
//! event. A failing or panicking render only fails its own job.

use std::sync::Arc;
use std::time::Duration;

use artifex_core::error::JobError;
use artifex_core::job::JobRecord;
use artifex_core::render::{RenderOutput, Renderer};
use artifex_core::storage::ArtifactStore;
use artifex_events::{Event, EventHub};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::{QueuedJob, SharedReceiver};
use crate::registry::JobRegistry;

/// Everything a worker needs to execute a job.
pub struct WorkerContext {
    pub registry: Arc<JobRegistry>,
    pub store: Arc<dyn ArtifactStore>,
    pub renderer: Arc<dyn Renderer>,
    pub hub: EventHub,
}

impl WorkerContext {
    /// Publish the current state of `record` to live subscribers.
    pub fn publish(&self, record: &JobRecord) {
        self.hub.publish(Event::from_job(record));
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `num_workers` worker tasks. They stop picking up new jobs once
    /// `cancel` is triggered.
    pub fn start(
        num_workers: usize,
        receiver: SharedReceiver,
        context: Arc<WorkerContext>,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..num_workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&receiver),
                    Arc::clone(&context),
                    cancel.clone(),
                ))
            })
            .collect();

        tracing::info!(num_workers, "Worker pool started");
        Self { handles, cancel }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Signal the workers to stop and wait up to `grace` for the jobs they
    /// are running to finish.
    ///
    /// Returns `true` if every worker exited within the grace period.
    /// Workers still running afterwards are aborted; the caller is
    /// responsible for failing whatever they left active.
    pub async fn shutdown(self, grace: Duration) -> bool {
        self.cancel.cancel();

        let aborts: Vec<_> = self.handles.iter().map(|h| h.abort_handle()).collect();
        let joined = tokio::time::timeout(grace, futures::future::join_all(self.handles)).await;

        match joined {
            Ok(_) => {
                tracing::info!("Worker pool drained");
                true
            }
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "Worker pool did not drain within grace period, aborting workers"
                );
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: SharedReceiver,
    context: Arc<WorkerContext>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker_id, "Worker started");

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            job = async { receiver.lock().await.recv().await } => job,
        };

        let Some(job) = next else {
            break;
        };
        execute(worker_id, &context, job).await;
    }

    tracing::debug!(worker_id, "Worker stopped");
}

async fn execute(worker_id: usize, context: &WorkerContext, job: QueuedJob) {
    let QueuedJob { job_id, request } = job;
    let key = request.key.clone();
    let kind = request.kind;

    let Some(running) = context.registry.mark_running(&key, job_id) else {
        tracing::debug!(worker_id, %job_id, key = %key, "Skipping job that is no longer pending");
        return;
    };
    context.publish(&running);
    tracing::info!(worker_id, %job_id, kind = %kind, key = %key, "Job started");

    let renderer = Arc::clone(&context.renderer);
    let store = Arc::clone(&context.store);
    let params = request.params;
    let store_key = key.clone();

    let result = tokio::task::spawn_blocking(move || {
        let output = renderer
            .render(&params)
            .map_err(|e| JobError::RenderFailure(e.to_string()))?;
        let scratch = match &output {
            RenderOutput::File(path) => Some(path.clone()),
            RenderOutput::Bytes(_) => None,
        };
        store.persist(kind, &store_key, output).map_err(|e| {
            if let Some(scratch) = scratch.filter(|p| p.exists()) {
                if let Err(rm) = std::fs::remove_file(&scratch) {
                    tracing::warn!(
                        path = %scratch.display(),
                        error = %rm,
                        "Failed to remove scratch output"
                    );
                }
            }
            JobError::Storage(e.to_string())
        })
    })
    .await
    .unwrap_or_else(|e| Err(JobError::RenderFailure(format!("renderer panicked: {e}"))));

    let finished = match result {
        Ok(path) => {
            let record = context.registry.complete(&key, job_id, path);
            if let Some(record) = &record {
                tracing::info!(
                    worker_id,
                    %job_id,
                    key = %key,
                    path = ?record.result_path,
                    "Job completed"
                );
            }
            record
        }
        Err(error) => {
            tracing::error!(worker_id, %job_id, key = %key, error = %error, "Job failed");
            context.registry.fail(&key, job_id, error)
        }
    };

    match finished {
        Some(record) => context.publish(&record),
        None => tracing::warn!(
            worker_id,
            %job_id,
            key = %key,
            "Job finished after it was abandoned, result discarded"
        ),
    }
}
