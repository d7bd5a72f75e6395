//! In-flight and recently finished job state, keyed by target key.
//!
//! The registry enforces at most one Pending/Running job per key. Every
//! mutation happens under one short, synchronous lock: a hash lookup plus a
//! struct update, never any rendering or I/O.
//!
//! Terminal records stay visible for a TTL so a lookup racing a completion
//! still sees the result. They are evicted lazily on access and by
//! [`run_janitor`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use artifex_core::error::JobError;
use artifex_core::job::{JobKind, JobRecord, JobStatus};
use artifex_core::keys::TargetKey;
use artifex_core::types::JobId;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Terminal result delivered to every waiter of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(PathBuf),
    Failed(JobError),
}

/// Result of [`JobRegistry::try_begin`].
#[derive(Debug, Clone)]
pub enum BeginOutcome {
    /// A new Pending job was registered; the caller owns its execution.
    Started(JobRecord),
    /// A Pending/Running job already exists for the key; join it instead.
    InProgress(JobRecord),
    /// The key completed recently and regeneration was not requested.
    Cached(JobRecord),
    /// The key is held by an active or completed job of another kind.
    KindConflict(JobRecord),
}

/// A handle for awaiting a job's terminal outcome.
#[derive(Debug)]
pub enum Join {
    /// The job is still active; the receiver resolves exactly once.
    Waiting(oneshot::Receiver<JobOutcome>),
    /// The job had already finished.
    Finished(JobOutcome),
}

struct Entry {
    record: JobRecord,
    waiters: Vec<oneshot::Sender<JobOutcome>>,
    /// Set when the record turns terminal.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    fn outcome(&self) -> Option<JobOutcome> {
        match self.record.status {
            JobStatus::Completed => self
                .record
                .result_path
                .clone()
                .map(JobOutcome::Completed),
            JobStatus::Failed => self.record.error.clone().map(JobOutcome::Failed),
            JobStatus::Pending | JobStatus::Running => None,
        }
    }

    fn release(&mut self, outcome: &JobOutcome) {
        for waiter in self.waiters.drain(..) {
            // A waiter that gave up has dropped its receiver.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Tracks job records and their waiters.
pub struct JobRegistry {
    entries: Mutex<HashMap<TargetKey, Entry>>,
    ttl: Duration,
}

impl JobRegistry {
    /// Create a registry that retains terminal records for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TargetKey, Entry>> {
        // Critical sections never panic mid-update; a poisoned map is intact.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Atomically look up `key` and register a new Pending job if none is
    /// active.
    ///
    /// A Completed record inside its TTL is returned as
    /// [`BeginOutcome::Cached`] unless `regenerate` is set. A Failed record
    /// never blocks a fresh attempt.
    ///
    /// A key stays bound to one [`JobKind`] while its record is active or
    /// completed; a request of another kind gets
    /// [`BeginOutcome::KindConflict`], even with `regenerate`.
    pub fn try_begin(&self, key: &TargetKey, kind: JobKind, regenerate: bool) -> BeginOutcome {
        let now = Instant::now();
        let mut entries = self.lock();

        if let Some(entry) = entries.get(key) {
            let holds_key = entry.record.is_active()
                || (entry.record.status == JobStatus::Completed && !entry.is_expired(now));
            if holds_key && entry.record.kind != kind {
                return BeginOutcome::KindConflict(entry.record.clone());
            }
            if entry.record.is_active() {
                return BeginOutcome::InProgress(entry.record.clone());
            }
            if !entry.is_expired(now) && entry.record.status == JobStatus::Completed && !regenerate
            {
                return BeginOutcome::Cached(entry.record.clone());
            }
        }

        let record = JobRecord::pending(kind, key.clone());
        entries.insert(
            key.clone(),
            Entry {
                record: record.clone(),
                waiters: Vec::new(),
                expires_at: None,
            },
        );
        BeginOutcome::Started(record)
    }

    /// Transition a Pending job to Running.
    ///
    /// Returns `None` if `job_id` is no longer the pending attempt for `key`
    /// (for example it was abandoned during shutdown).
    pub fn mark_running(&self, key: &TargetKey, job_id: JobId) -> Option<JobRecord> {
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        if entry.record.id != job_id || entry.record.status != JobStatus::Pending {
            return None;
        }
        entry.record.status = JobStatus::Running;
        entry.record.started_at = Some(chrono::Utc::now());
        Some(entry.record.clone())
    }

    /// Transition an active job to Completed and release its waiters.
    pub fn complete(&self, key: &TargetKey, job_id: JobId, path: PathBuf) -> Option<JobRecord> {
        self.finish(key, job_id, JobOutcome::Completed(path))
    }

    /// Transition an active job to Failed and release its waiters.
    pub fn fail(&self, key: &TargetKey, job_id: JobId, error: JobError) -> Option<JobRecord> {
        self.finish(key, job_id, JobOutcome::Failed(error))
    }

    fn finish(&self, key: &TargetKey, job_id: JobId, outcome: JobOutcome) -> Option<JobRecord> {
        let expires_at = Instant::now() + self.ttl;
        let mut entries = self.lock();
        let entry = entries.get_mut(key)?;
        if entry.record.id != job_id || !entry.record.is_active() {
            return None;
        }
        apply_outcome(&mut entry.record, &outcome);
        entry.expires_at = Some(expires_at);
        entry.release(&outcome);
        Some(entry.record.clone())
    }

    /// Remove a job that was never admitted, releasing anyone who joined it
    /// in the meantime with `error`.
    pub fn discard(&self, key: &TargetKey, job_id: JobId, error: JobError) {
        let mut entries = self.lock();
        let Some(entry) = entries.get(key) else {
            return;
        };
        if entry.record.id != job_id {
            return;
        }
        if let Some(mut entry) = entries.remove(key) {
            entry.release(&JobOutcome::Failed(error));
        }
    }

    /// Attach to the job for `key`.
    ///
    /// Returns `None` if the key is unknown or its record has expired.
    pub fn join(&self, key: &TargetKey) -> Option<Join> {
        let now = Instant::now();
        let mut entries = self.lock();
        let entry = live_entry(&mut entries, key, now)?;

        if let Some(outcome) = entry.outcome() {
            return Some(Join::Finished(outcome));
        }

        // Drop senders whose waiters already gave up.
        entry.waiters.retain(|w| !w.is_closed());
        let (tx, rx) = oneshot::channel();
        entry.waiters.push(tx);
        Some(Join::Waiting(rx))
    }

    /// Current record for `key`, if known and not expired.
    pub fn get(&self, key: &TargetKey) -> Option<JobRecord> {
        let now = Instant::now();
        let mut entries = self.lock();
        live_entry(&mut entries, key, now).map(|e| e.record.clone())
    }

    /// Evict every expired terminal record. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Fail every Pending/Running job with `error` and return the updated
    /// records.
    pub fn fail_all_active(&self, error: JobError) -> Vec<JobRecord> {
        let expires_at = Instant::now() + self.ttl;
        let outcome = JobOutcome::Failed(error);
        let mut entries = self.lock();

        entries
            .values_mut()
            .filter(|entry| entry.record.is_active())
            .map(|entry| {
                apply_outcome(&mut entry.record, &outcome);
                entry.expires_at = Some(expires_at);
                entry.release(&outcome);
                entry.record.clone()
            })
            .collect()
    }

    /// Number of Pending/Running jobs.
    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|e| e.record.is_active()).count()
    }

    /// Number of tracked records, including unexpired terminal ones.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live_entry<'a>(
    entries: &'a mut HashMap<TargetKey, Entry>,
    key: &TargetKey,
    now: Instant,
) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
        return None;
    }
    entries.get_mut(key)
}

fn apply_outcome(record: &mut JobRecord, outcome: &JobOutcome) {
    record.finished_at = Some(chrono::Utc::now());
    match outcome {
        JobOutcome::Completed(path) => {
            record.status = JobStatus::Completed;
            record.result_path = Some(path.clone());
            record.error = None;
        }
        JobOutcome::Failed(error) => {
            record.status = JobStatus::Failed;
            record.result_path = None;
            record.error = Some(error.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Janitor
// ---------------------------------------------------------------------------

/// Periodically evict expired terminal records until `cancel` is triggered.
pub async fn run_janitor(registry: Arc<JobRegistry>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        ttl_secs = registry.ttl.as_secs(),
        "Registry janitor started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Registry janitor stopping");
                break;
            }
            _ = ticker.tick() => {
                let purged = registry.purge_expired();
                if purged > 0 {
                    tracing::info!(purged, "Registry janitor: evicted expired records");
                } else {
                    tracing::debug!("Registry janitor: nothing to evict");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use assert_matches::assert_matches;

    const TTL: Duration = Duration::from_secs(300);

    fn key(raw: &str) -> TargetKey {
        TargetKey::parse(raw).unwrap()
    }

    fn begin(registry: &JobRegistry, k: &TargetKey) -> JobRecord {
        match registry.try_begin(k, JobKind::Thumbnail, false) {
            BeginOutcome::Started(record) => record,
            other => panic!("expected a new job, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn second_begin_for_active_key_is_in_progress() {
        let registry = JobRegistry::new(TTL);
        let k = key("thumbnail:/a.jpg@10x10");
        let first = begin(&registry, &k);

        assert_matches!(
            registry.try_begin(&k, JobKind::Thumbnail, false),
            BeginOutcome::InProgress(r) if r.id == first.id
        );
        // Regeneration never supersedes an active job.
        assert_matches!(
            registry.try_begin(&k, JobKind::Thumbnail, true),
            BeginOutcome::InProgress(_)
        );
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn completed_key_is_cached_until_regenerated() {
        let registry = JobRegistry::new(TTL);
        let k = key("thumbnail:/a.jpg@10x10");
        let first = begin(&registry, &k);
        registry.complete(&k, first.id, "/out/a.jpg".into()).unwrap();

        assert_matches!(
            registry.try_begin(&k, JobKind::Thumbnail, false),
            BeginOutcome::Cached(r) if r.result_path.as_deref() == Some(Path::new("/out/a.jpg"))
        );
        assert_matches!(
            registry.try_begin(&k, JobKind::Thumbnail, true),
            BeginOutcome::Started(r) if r.id != first.id
        );
    }

    #[tokio::test]
    async fn key_held_by_another_kind_conflicts() {
        let registry = JobRegistry::new(TTL);
        let k = key("album-9-download");
        let thumb = begin(&registry, &k);

        assert_matches!(
            registry.try_begin(&k, JobKind::Archive, false),
            BeginOutcome::KindConflict(r) if r.id == thumb.id && r.kind == JobKind::Thumbnail
        );

        registry.complete(&k, thumb.id, "/out/a.jpg".into()).unwrap();
        assert_matches!(
            registry.try_begin(&k, JobKind::Archive, false),
            BeginOutcome::KindConflict(_)
        );
        assert_matches!(
            registry.try_begin(&k, JobKind::Archive, true),
            BeginOutcome::KindConflict(_)
        );
    }

    #[tokio::test]
    async fn failed_key_of_another_kind_is_replaced() {
        let registry = JobRegistry::new(TTL);
        let k = key("album-9-download");
        let thumb = begin(&registry, &k);
        registry
            .fail(&k, thumb.id, JobError::RenderFailure("bad".into()))
            .unwrap();

        assert_matches!(
            registry.try_begin(&k, JobKind::Archive, false),
            BeginOutcome::Started(r) if r.kind == JobKind::Archive
        );
    }

    #[tokio::test]
    async fn failed_key_starts_a_fresh_attempt() {
        let registry = JobRegistry::new(TTL);
        let k = key("thumbnail:/a.jpg@10x10");
        let first = begin(&registry, &k);
        registry
            .fail(&k, first.id, JobError::RenderFailure("bad".into()))
            .unwrap();

        assert_matches!(
            registry.try_begin(&k, JobKind::Thumbnail, false),
            BeginOutcome::Started(r) if r.id != first.id
        );
    }

    #[tokio::test]
    async fn lifecycle_sets_timestamps_and_result() {
        let registry = JobRegistry::new(TTL);
        let k = key("thumbnail:/a.jpg@10x10");
        let job = begin(&registry, &k);

        let running = registry.mark_running(&k, job.id).unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert!(running.started_at.is_some());

        let done = registry.complete(&k, job.id, "/out/a.jpg".into()).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result_path, Some(PathBuf::from("/out/a.jpg")));
        assert!(done.finished_at.is_some());
        assert!(done.error.is_none());
    }

    #[tokio::test]
    async fn stale_attempt_cannot_finish_a_newer_one() {
        let registry = JobRegistry::new(TTL);
        let k = key("thumbnail:/a.jpg@10x10");
        let old = begin(&registry, &k);
        registry
            .fail(&k, old.id, JobError::ShutdownAbandoned)
            .unwrap();
        let new = begin(&registry, &k);

        assert!(registry.complete(&k, old.id, "/stale".into()).is_none());
        assert!(registry.mark_running(&k, old.id).is_none());
        assert_eq!(registry.get(&k).unwrap().id, new.id);
        assert_eq!(registry.get(&k).unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn terminal_transition_happens_once() {
        let registry = JobRegistry::new(TTL);
        let k = key("thumbnail:/a.jpg@10x10");
        let job = begin(&registry, &k);

        assert!(registry.complete(&k, job.id, "/a".into()).is_some());
        assert!(registry.complete(&k, job.id, "/b".into()).is_none());
        assert!(registry
            .fail(&k, job.id, JobError::RenderFailure("late".into()))
            .is_none());
        assert_eq!(
            registry.get(&k).unwrap().result_path,
            Some(PathBuf::from("/a"))
        );
    }

    #[tokio::test]
    async fn every_waiter_is_released_with_the_same_outcome() {
        let registry = JobRegistry::new(TTL);
        let k = key("archive:album:00ff");
        let job = begin(&registry, &k);

        let waiters: Vec<_> = (0..3)
            .map(|_| match registry.join(&k) {
                Some(Join::Waiting(rx)) => rx,
                other => panic!("expected to wait, got {other:?}"),
            })
            .collect();

        registry.complete(&k, job.id, "/out/a.zip".into()).unwrap();

        for rx in waiters {
            assert_eq!(
                rx.await.unwrap(),
                JobOutcome::Completed("/out/a.zip".into())
            );
        }
    }

    #[tokio::test]
    async fn join_after_completion_is_immediate() {
        let registry = JobRegistry::new(TTL);
        let k = key("archive:album:00ff");
        let job = begin(&registry, &k);
        registry
            .fail(&k, job.id, JobError::RenderFailure("corrupt".into()))
            .unwrap();

        assert_matches!(
            registry.join(&k),
            Some(Join::Finished(JobOutcome::Failed(JobError::RenderFailure(_))))
        );
        assert!(registry.join(&key("archive:other:00")).is_none());
    }

    #[tokio::test]
    async fn discard_releases_joiners_and_forgets_the_key() {
        let registry = JobRegistry::new(TTL);
        let k = key("thumbnail:/a.jpg@10x10");
        let job = begin(&registry, &k);
        let Some(Join::Waiting(rx)) = registry.join(&k) else {
            panic!("expected to wait");
        };

        registry.discard(&k, job.id, JobError::QueueFull { capacity: 2 });

        assert_eq!(
            rx.await.unwrap(),
            JobOutcome::Failed(JobError::QueueFull { capacity: 2 })
        );
        assert!(registry.get(&k).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_records_expire_after_ttl() {
        let registry = JobRegistry::new(Duration::from_secs(5));
        let k = key("thumbnail:/a.jpg@10x10");
        let job = begin(&registry, &k);
        registry.complete(&k, job.id, "/a".into()).unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(registry.get(&k).is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(registry.get(&k).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_keeps_active_and_fresh_records() {
        let registry = JobRegistry::new(Duration::from_secs(5));
        let done = key("thumbnail:/done.jpg@1x1");
        let active = key("thumbnail:/active.jpg@1x1");
        let job = begin(&registry, &done);
        registry.complete(&done, job.id, "/done".into()).unwrap();
        begin(&registry, &active);

        assert_eq!(registry.purge_expired(), 0);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(registry.purge_expired(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.active_count(), 1);
    }

    #[tokio::test]
    async fn fail_all_active_leaves_terminal_records_alone() {
        let registry = JobRegistry::new(TTL);
        let done = key("thumbnail:/done.jpg@1x1");
        let pending = key("thumbnail:/pending.jpg@1x1");
        let running = key("thumbnail:/running.jpg@1x1");
        let job = begin(&registry, &done);
        registry.complete(&done, job.id, "/done".into()).unwrap();
        begin(&registry, &pending);
        let r = begin(&registry, &running);
        registry.mark_running(&running, r.id).unwrap();

        let failed = registry.fail_all_active(JobError::ShutdownAbandoned);

        assert_eq!(failed.len(), 2);
        assert!(failed
            .iter()
            .all(|r| r.error == Some(JobError::ShutdownAbandoned)));
        assert_eq!(registry.get(&done).unwrap().status, JobStatus::Completed);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_purges_and_stops_on_cancel() {
        let registry = Arc::new(JobRegistry::new(Duration::from_secs(1)));
        let k = key("thumbnail:/a.jpg@10x10");
        let job = begin(&registry, &k);
        registry.complete(&k, job.id, "/a".into()).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_janitor(
            Arc::clone(&registry),
            Duration::from_secs(10),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(registry.len(), 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
