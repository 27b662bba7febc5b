//! Job queue of the engine.
//!
//! Tracking a local write does not replicate it: it queues a job for the
//! sharing, delayed by the debounce window. Further writes in the window find
//! the job already queued and join it. Failed rounds come back as retry jobs,
//! delayed by their backoff and never debounced.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use sharing_sync::RetryDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Reference every shared document, then replicate and upload.
    Initial,
    Replicate,
    Upload,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Initial => "initial",
            JobKind::Replicate => "replicate",
            JobKind::Upload => "upload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub sharing_id: String,
    pub kind: JobKind,
    pub retry: RetryDescriptor,
}

impl Job {
    pub fn new(sharing_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            sharing_id: sharing_id.into(),
            kind,
            retry: RetryDescriptor::default(),
        }
    }

    fn same_round(&self, other: &Job) -> bool {
        self.kind == other.kind && self.sharing_id == other.sharing_id
    }
}

#[derive(Debug)]
struct Queued {
    job: Job,
    due: Instant,
}

#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<Queued>>,
    notify: Notify,
    closed: AtomicBool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Queued>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a job to run after `delay`. Returns false when an identical
    /// first-attempt job is already waiting.
    pub fn push(&self, job: Job, delay: Duration) -> bool {
        let mut jobs = self.lock();
        if !job.retry.is_retry()
            && jobs
                .iter()
                .any(|q| !q.job.retry.is_retry() && q.job.same_round(&job))
        {
            return false;
        }
        jobs.push_back(Queued {
            job,
            due: Instant::now() + delay,
        });
        drop(jobs);
        self.notify.notify_one();
        true
    }

    /// The earliest job due at `now`.
    pub fn pop_ready(&self, now: Instant) -> Option<Job> {
        let mut jobs = self.lock();
        let index = jobs
            .iter()
            .enumerate()
            .filter(|(_, q)| q.due <= now)
            .min_by_key(|(_, q)| q.due)
            .map(|(i, _)| i)?;
        jobs.remove(index).map(|q| q.job)
    }

    /// The oldest first-attempt job, due or not. Retry jobs stay queued.
    pub fn pop_immediate(&self) -> Option<Job> {
        let mut jobs = self.lock();
        let index = jobs.iter().position(|q| !q.job.retry.is_retry())?;
        jobs.remove(index).map(|q| q.job)
    }

    pub fn next_due(&self) -> Option<Instant> {
        self.lock().iter().map(|q| q.due).min()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Jobs waiting for a sharing.
    pub fn pending_for(&self, sharing_id: &str) -> Vec<Job> {
        self.lock()
            .iter()
            .filter(|q| q.job.sharing_id == sharing_id)
            .map(|q| q.job.clone())
            .collect()
    }

    /// Drop every job of a sharing.
    pub fn cancel(&self, sharing_id: &str) -> usize {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|q| q.job.sharing_id != sharing_id);
        before - jobs.len()
    }

    /// Wait until a job is due, or the queue is closed. Returns the due job.
    pub async fn next(&self) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            if self.is_closed() {
                return None;
            }
            if let Some(job) = self.pop_ready(Instant::now()) {
                return Some(job);
            }
            match self.next_due() {
                Some(due) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Wake every waiting worker and stop handing out jobs.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_debounce_joins_queued_job() {
        let queue = JobQueue::new();
        assert!(queue.push(Job::new("s1", JobKind::Replicate), Duration::from_secs(5)));
        assert!(!queue.push(Job::new("s1", JobKind::Replicate), Duration::from_secs(5)));
        assert!(queue.push(Job::new("s1", JobKind::Upload), Duration::from_secs(5)));
        assert!(queue.push(Job::new("s2", JobKind::Replicate), Duration::from_secs(5)));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop_ready(Instant::now()), None);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(queue.pop_ready(Instant::now()).unwrap().sharing_id, "s1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_jobs_are_not_debounced() {
        let queue = JobQueue::new();
        queue.push(Job::new("s1", JobKind::Replicate), Duration::ZERO);
        let mut retry = Job::new("s1", JobKind::Replicate);
        retry.retry.attempt = 1;
        assert!(queue.push(retry, Duration::from_secs(120)));

        assert!(!queue.pop_immediate().unwrap().retry.is_retry());
        assert_eq!(queue.pop_immediate(), None);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_waits_for_due_job() {
        let queue = std::sync::Arc::new(JobQueue::new());
        queue.push(Job::new("s1", JobKind::Upload), Duration::from_secs(10));
        let start = Instant::now();
        let job = queue.next().await.unwrap();
        assert_eq!(job.kind, JobKind::Upload);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_close_releases_waiters() {
        let queue = std::sync::Arc::new(JobQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[test]
    fn test_cancel_drops_sharing_jobs() {
        let queue = JobQueue::new();
        queue.push(Job::new("s1", JobKind::Replicate), Duration::ZERO);
        queue.push(Job::new("s1", JobKind::Upload), Duration::ZERO);
        queue.push(Job::new("s2", JobKind::Upload), Duration::ZERO);
        assert_eq!(queue.cancel("s1"), 2);
        assert_eq!(queue.pending_for("s2").len(), 1);
    }
}
