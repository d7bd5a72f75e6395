//! Bounded admission buffer between submitters and workers.
//!
//! Admission never waits: a full queue rejects immediately with
//! [`JobError::QueueFull`], and a closed queue with
//! [`JobError::ShuttingDown`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use artifex_core::error::JobError;
use artifex_core::job::JobRequest;
use artifex_core::types::JobId;
use tokio::sync::{mpsc, Mutex};

/// A job admitted to the queue, not yet picked up by a worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job_id: JobId,
    pub request: JobRequest,
}

/// Receiving side shared by all workers. Each worker takes the lock only for
/// the duration of one dequeue, so jobs leave in admission order.
pub type SharedReceiver = Arc<Mutex<mpsc::Receiver<QueuedJob>>>;

pub struct WorkQueue {
    sender: mpsc::Sender<QueuedJob>,
    receiver: SharedReceiver,
    capacity: usize,
    closed: AtomicBool,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            capacity,
            closed: AtomicBool::new(false),
        }
    }

    /// Admit a job or fail immediately.
    pub fn enqueue(&self, job: QueuedJob) -> Result<(), JobError> {
        if self.is_closed() {
            return Err(JobError::ShuttingDown);
        }
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => JobError::QueueFull {
                capacity: self.capacity,
            },
            mpsc::error::TrySendError::Closed(_) => JobError::ShuttingDown,
        })
    }

    /// Stop admitting work. Already-queued jobs stay in the buffer until
    /// drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Remove and return every job still waiting in the buffer.
    pub async fn drain(&self) -> Vec<QueuedJob> {
        let mut receiver = self.receiver.lock().await;
        let mut drained = Vec::new();
        while let Ok(job) = receiver.try_recv() {
            drained.push(job);
        }
        drained
    }

    pub fn receiver(&self) -> SharedReceiver {
        Arc::clone(&self.receiver)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of admitted jobs not yet picked up by a worker.
    pub fn depth(&self) -> usize {
        self.capacity - self.sender.capacity()
    }
}
