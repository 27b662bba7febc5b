//! The Engine: one instance's side of every sharing it takes part in.
//!
//! The engine owns the sync context of the instance, listens to its local
//! writes, and runs the replication and upload rounds they call for. The
//! lifecycle of sharings lives in [`crate::lifecycle`] and
//! [`crate::membership`]; the peer protocol in [`crate::inbound`].

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sharing_core::now_millis;
use sharing_perms::{ContactBook, Sharing, StoreContactBook};
use sharing_store::{DocumentStore, Event, EventBus, Vfs};
use sharing_sync::{RoundReport, SyncContext, SyncError, TrackOutcome, Transport, UploadStore};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::jobs::{Job, JobKind, JobQueue};
use crate::notify::{LogNotifier, Notifier};
use crate::task::{spawn_best_effort, TaskHandle};

/// Builds an [`Engine`].
pub struct EngineBuilder<S, V> {
    config: EngineConfig,
    store: Arc<S>,
    vfs: Arc<V>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    contacts: Option<Arc<dyn ContactBook>>,
    notifier: Option<Arc<dyn Notifier>>,
    uploads: Option<Arc<dyn UploadStore>>,
}

impl<S: DocumentStore + 'static, V: Vfs + 'static> EngineBuilder<S, V> {
    /// `events` must be the bus the store and the VFS publish on.
    pub fn new(
        config: EngineConfig,
        store: Arc<S>,
        vfs: Arc<V>,
        transport: Arc<dyn Transport>,
        events: &EventBus,
    ) -> Self {
        Self {
            config,
            store,
            vfs,
            transport,
            events: events.clone(),
            contacts: None,
            notifier: None,
            uploads: None,
        }
    }

    /// Defaults to the contacts stored in the document store.
    pub fn contacts(mut self, contacts: Arc<dyn ContactBook>) -> Self {
        self.contacts = Some(contacts);
        self
    }

    /// Defaults to a notifier that only logs.
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn upload_store(mut self, uploads: Arc<dyn UploadStore>) -> Self {
        self.uploads = Some(uploads);
        self
    }

    pub fn build(self) -> Arc<Engine<S, V>> {
        let mut ctx = SyncContext::new(
            self.config.instance_url.clone(),
            self.store.clone(),
            self.vfs,
            self.transport,
        )
        .with_config(self.config.sync.clone());
        if let Some(uploads) = self.uploads {
            ctx = ctx.with_upload_store(uploads);
        }
        let contacts = self
            .contacts
            .unwrap_or_else(|| Arc::new(StoreContactBook::new(self.store)));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let receiver = self.events.subscribe();

        Arc::new_cyclic(|this| Engine {
            this: this.clone(),
            ctx,
            config: self.config,
            contacts,
            notifier,
            events: tokio::sync::Mutex::new(receiver),
            jobs: JobQueue::new(),
            tasks: Mutex::new(Vec::new()),
            stop: Notify::new(),
        })
    }
}

/// The sharing engine of one instance.
pub struct Engine<S, V> {
    this: Weak<Engine<S, V>>,
    pub(crate) ctx: SyncContext<S, V>,
    pub(crate) config: EngineConfig,
    pub(crate) contacts: Arc<dyn ContactBook>,
    pub(crate) notifier: Arc<dyn Notifier>,
    events: tokio::sync::Mutex<broadcast::Receiver<Event>>,
    pub(crate) jobs: JobQueue,
    tasks: Mutex<Vec<TaskHandle>>,
    stop: Notify,
}

impl<S: DocumentStore + 'static, V: Vfs + 'static> Engine<S, V> {
    pub fn instance_url(&self) -> &str {
        &self.ctx.instance_url
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &SyncContext<S, V> {
        &self.ctx
    }

    pub fn store(&self) -> &S {
        &self.ctx.store
    }

    pub fn vfs(&self) -> &V {
        &self.ctx.vfs
    }

    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    pub async fn sharing(&self, sharing_id: &str) -> Result<Sharing> {
        match self.ctx.load_sharing(sharing_id).await {
            Err(SyncError::NotFound(_)) => Err(EngineError::SharingNotFound(sharing_id.to_string())),
            other => Ok(other?),
        }
    }

    pub async fn sharings(&self) -> Result<Vec<Sharing>> {
        Ok(self.ctx.all_sharings().await?)
    }

    pub(crate) fn arc(&self) -> Result<Arc<Self>> {
        self.this
            .upgrade()
            .ok_or_else(|| EngineError::InvalidOperation("engine is shutting down".into()))
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<TaskHandle>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a best-effort task on behalf of the engine.
    pub(crate) fn spawn_task<F>(&self, name: String, future: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let handle = spawn_best_effort(name, future);
        let mut tasks = self.tasks();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Queue a round of the replicator or the uploader, after the debounce
    /// window.
    pub(crate) fn schedule(&self, sharing_id: &str, kind: JobKind) {
        if self
            .jobs
            .push(Job::new(sharing_id, kind), self.config.replicate_debounce)
        {
            debug!(sharing_id, job = kind.as_str(), "job queued");
        }
    }

    /// On the owner, writes received from one member go on to the others.
    pub(crate) fn forward(&self, sharing: &Sharing, kind: JobKind) {
        if sharing.owner && sharing.ready_members().len() > 1 {
            self.schedule(&sharing.id, kind);
        }
    }

    // Local writes

    /// Track every local write received so far. Returns how many there were.
    pub async fn process_events(&self) -> Result<usize> {
        self.drain_events(Vec::new()).await
    }

    async fn drain_events(&self, mut events: Vec<Event>) -> Result<usize> {
        {
            let mut receiver = self.events.lock().await;
            loop {
                match receiver.try_recv() {
                    Ok(event) => events.push(event),
                    Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                        warn!(skipped, "event receiver lagged, writes were not tracked");
                    }
                    Err(_) => break,
                }
            }
        }
        let count = events.len();
        if count > 0 {
            self.track_events(events).await?;
        }
        Ok(count)
    }

    async fn track_events(&self, events: Vec<Event>) -> Result<()> {
        let sharings: Vec<Sharing> = self
            .ctx
            .all_sharings()
            .await?
            .into_iter()
            .filter(|s| s.active)
            .collect();
        if sharings.is_empty() {
            return Ok(());
        }

        let mut revoked: Vec<String> = Vec::new();
        for event in &events {
            for sharing in &sharings {
                match self.ctx.track_event(sharing, event).await {
                    Ok(TrackOutcome::Unchanged) => {}
                    Ok(TrackOutcome::Updated { replicate, upload }) => {
                        if replicate {
                            self.schedule(&sharing.id, JobKind::Replicate);
                        }
                        if upload {
                            self.schedule(&sharing.id, JobKind::Upload);
                        }
                    }
                    Ok(TrackOutcome::RevokeSharing) => {
                        if !revoked.contains(&sharing.id) {
                            revoked.push(sharing.id.clone());
                        }
                    }
                    Err(e) => {
                        warn!(sharing_id = %sharing.id, doc = %event.doc.doc_ref(), error = %e, "failed to track write");
                    }
                }
            }
        }

        for sharing_id in revoked {
            let sharing = self.ctx.load_sharing(&sharing_id).await?;
            let result = if sharing.owner {
                self.revoke_sharing(&sharing_id).await
            } else {
                self.leave(&sharing_id).await
            };
            if let Err(e) = result {
                warn!(sharing_id = %sharing_id, error = %e, "failed to revoke sharing");
            }
        }
        Ok(())
    }

    // Jobs

    /// Run a job. A failed round goes back to the queue with its backoff, or
    /// is abandoned once its retries are exhausted.
    pub async fn run_job(&self, job: Job) {
        let result = match job.kind {
            JobKind::Initial => self.initial_round(&job.sharing_id).await,
            JobKind::Replicate | JobKind::Upload => self.sync_round(&job).await,
        };
        let Err(e) = result else {
            return;
        };
        let sync = &self.config.sync;
        match job.retry.next(sync.retry_base, sync.max_retries, now_millis()) {
            Some((retry, delay)) => {
                warn!(
                    sharing_id = %job.sharing_id,
                    job = job.kind.as_str(),
                    attempt = retry.attempt,
                    delay_secs = delay.as_secs(),
                    error = %e,
                    "round failed, retrying"
                );
                self.jobs.push(Job { retry, ..job }, delay);
            }
            None => {
                error!(
                    sharing_id = %job.sharing_id,
                    job = job.kind.as_str(),
                    attempts = job.retry.attempt + 1,
                    error = %e,
                    "round abandoned"
                );
            }
        }
    }

    /// The sharing a job works on, when it still has work.
    async fn job_sharing(&self, sharing_id: &str) -> Result<Option<Sharing>> {
        match self.ctx.load_sharing(sharing_id).await {
            Ok(sharing) if sharing.active => Ok(Some(sharing)),
            Ok(_) | Err(SyncError::NotFound(_)) => {
                debug!(sharing_id, "job for an inactive sharing dropped");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn initial_round(&self, sharing_id: &str) -> Result<()> {
        let Some(sharing) = self.job_sharing(sharing_id).await? else {
            return Ok(());
        };
        if !sharing.owner {
            return Ok(());
        }
        let files = self.ctx.initial_copy(&sharing).await?;
        self.ctx
            .modify_sharing(sharing_id, |s| {
                s.initial = true;
                s.nb_files = files;
                Ok(())
            })
            .await?;
        info!(sharing_id, files, "initial copy started");
        self.jobs.push(Job::new(sharing_id, JobKind::Replicate), Duration::ZERO);
        self.jobs.push(Job::new(sharing_id, JobKind::Upload), Duration::ZERO);
        Ok(())
    }

    async fn sync_round(&self, job: &Job) -> Result<()> {
        let sharing_id = job.sharing_id.as_str();
        let Some(sharing) = self.job_sharing(sharing_id).await? else {
            return Ok(());
        };

        let mut pending = false;
        let mut errors = Vec::new();
        for member in sharing.ready_members() {
            let round = async {
                match job.kind {
                    JobKind::Upload => self.ctx.upload_to(sharing_id, member).await,
                    _ => self.ctx.replicate_to(sharing_id, member).await,
                }
            };
            match tokio::time::timeout(self.config.round_timeout, round).await {
                Ok(Ok(RoundReport { pending: more, .. })) => pending |= more,
                Ok(Err(e)) if e.is_unauthorized() => {
                    warn!(sharing_id, member, error = %e, "member refused our credentials");
                    self.infer_revocation(sharing_id, member).await?;
                }
                Ok(Err(e)) => errors.push(e),
                Err(_) => errors.push(SyncError::Timeout(format!(
                    "{} round to member {}",
                    job.kind.as_str(),
                    member
                ))),
            }
        }

        if pending {
            self.jobs.push(Job::new(sharing_id, job.kind), Duration::ZERO);
        } else if errors.is_empty() && job.kind == JobKind::Upload && sharing.owner && sharing.initial {
            self.end_initial(sharing_id).await?;
        }
        SyncError::collect(errors)?;
        Ok(())
    }

    /// Tell the members that everything has been sent once.
    async fn end_initial(&self, sharing_id: &str) -> Result<()> {
        let sharing = self.ctx.load_active_sharing(sharing_id).await?;
        let transport = self.ctx.transport.as_ref();
        for member in sharing.ready_members() {
            self.ctx
                .call_with_refresh(sharing_id, member, |target| async move {
                    transport.end_initial(&target, sharing_id).await
                })
                .await?;
        }
        self.ctx
            .modify_sharing(sharing_id, |s| {
                s.initial = false;
                Ok(())
            })
            .await?;
        info!(sharing_id, "initial copy done");
        Ok(())
    }

    /// A member refused our token even after a refresh: it no longer takes
    /// part in the sharing.
    async fn infer_revocation(&self, sharing_id: &str, member: usize) -> Result<()> {
        let sharing = self.ctx.load_sharing(sharing_id).await?;
        if sharing.owner {
            self.member_left(sharing_id, member).await
        } else {
            self.deactivate(sharing_id).await
        }
    }

    // Workers

    /// Track pending writes and run every queued job, ignoring their delays,
    /// until nothing is left. Retry jobs stay queued. Returns the number of
    /// writes, jobs and tasks handled.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let mut handled = 0;
        loop {
            handled += self.process_events().await?;
            if let Some(job) = self.jobs.pop_immediate() {
                self.run_job(job).await;
                handled += 1;
                continue;
            }
            let tasks = std::mem::take(&mut *self.tasks());
            if tasks.is_empty() {
                return Ok(handled);
            }
            for task in tasks {
                handled += 1;
                // Failures were logged by the task itself.
                let _ = task.join().await;
            }
        }
    }

    /// Start the event loop and `config.workers` job workers.
    pub fn spawn_workers(&self) -> Result<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(self.config.workers + 1);

        let engine = self.arc()?;
        handles.push(tokio::spawn(async move {
            loop {
                let stopped = engine.stop.notified();
                if engine.jobs.is_closed() {
                    break;
                }
                let received = {
                    let mut receiver = engine.events.lock().await;
                    tokio::select! {
                        _ = stopped => break,
                        received = receiver.recv() => received,
                    }
                };
                let first = match received {
                    Ok(event) => vec![event],
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event receiver lagged, writes were not tracked");
                        Vec::new()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if let Err(e) = engine.drain_events(first).await {
                    warn!(error = %e, "failed to track writes");
                }
            }
            debug!("event loop stopped");
        }));

        for worker in 0..self.config.workers {
            let engine = self.arc()?;
            handles.push(tokio::spawn(async move {
                while let Some(job) = engine.jobs.next().await {
                    engine.run_job(job).await;
                }
                debug!(worker, "worker stopped");
            }));
        }
        info!(instance = %self.ctx.instance_url, workers = self.config.workers, "engine started");
        Ok(handles)
    }

    /// Stop the workers. Queued jobs are dropped.
    pub fn shutdown(&self) {
        self.jobs.close();
        self.stop.notify_waiters();
        for task in self.tasks().drain(..) {
            task.abort();
        }
    }
}
