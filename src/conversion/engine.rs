//! Job orchestration.
//!
//! [`JobEngine`] owns the job state machine. It is the only writer of job
//! records: it persists each transition, republishes runner output to the
//! [`EventHub`], and closes a job's topic once the terminal state has been
//! stored. Because the terminal write happens before the topic closes, a
//! subscriber that misses the topic always finds the terminal state in the
//! store.

use crate::config::Config;
use crate::conversion::runner::{
    ConversionFailure, ConversionOutput, ConversionRunner, RunnerRecord,
};
use crate::events::{EventHub, OutputEvent, Subscription};
use crate::store::JobStore;
use mp3ify_common::{Error, JobId, JobState, Result};
use mp3ify_db::models::{Job, JobSummary};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Failure reason recorded when a converting job is deleted.
pub const CANCELLED_REASON: &str = "cancelled by user";

/// Failure reason recorded for jobs found converting at startup.
pub const INTERRUPTED_REASON: &str = "interrupted by restart";

/// Extra time allowed on top of the converter's kill grace when waiting
/// for a cancelled worker.
const CANCEL_MARGIN: Duration = Duration::from_secs(5);

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Maximum number of jobs running a converter at once. `0` is unbounded.
    pub max_concurrent: usize,
    /// How long `delete_job` and `shutdown` wait for a cancelled worker.
    pub cancel_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent: config.engine.max_concurrent,
            cancel_timeout: config.converter.kill_grace() + CANCEL_MARGIN,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct ActiveJob {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct EngineInner {
    store: JobStore,
    hub: Arc<EventHub>,
    runner: Arc<dyn ConversionRunner>,
    settings: EngineSettings,
    permits: Option<Arc<Semaphore>>,
    /// At most one worker per job id.
    active: Mutex<HashMap<JobId, ActiveJob>>,
    shutdown: CancellationToken,
}

/// Creates, runs, tracks and deletes conversion jobs.
///
/// Cheap to clone; clones share the same jobs.
#[derive(Clone)]
pub struct JobEngine {
    inner: Arc<EngineInner>,
}

impl JobEngine {
    /// Recover from any previous run, then return a running engine.
    ///
    /// Jobs left `CONVERTING` have no process behind them any more and are
    /// failed with [`INTERRUPTED_REASON`]. Jobs left `CREATED` were accepted
    /// but never started, and are dispatched again. Both happen before this
    /// returns, so no new job can be accepted first.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        store: JobStore,
        hub: Arc<EventHub>,
        runner: Arc<dyn ConversionRunner>,
        settings: EngineSettings,
    ) -> Result<Self> {
        let permits = (settings.max_concurrent > 0)
            .then(|| Arc::new(Semaphore::new(settings.max_concurrent)));

        let engine = Self {
            inner: Arc::new(EngineInner {
                store,
                hub,
                runner,
                settings,
                permits,
                active: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        };

        engine.recover()?;
        Ok(engine)
    }

    fn recover(&self) -> Result<()> {
        let orphaned = self.inner.store.fail_orphaned(INTERRUPTED_REASON)?;
        if orphaned > 0 {
            tracing::info!("Failed {} conversion jobs interrupted by restart", orphaned);
        }

        let pending = self.inner.store.list_by_state(JobState::Created)?;
        if !pending.is_empty() {
            tracing::info!("Resuming {} conversion jobs that never started", pending.len());
        }
        for job in pending {
            self.inner.hub.open(job.id);
            self.dispatch(job.id, job.source);
        }

        Ok(())
    }

    pub fn store(&self) -> &JobStore {
        &self.inner.store
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.inner.hub
    }

    /// Accept a new job and start converting it in the background.
    ///
    /// Returns as soon as the `CREATED` record is stored. Only an empty
    /// source reference is rejected; every later failure ends up as a
    /// `FAILED` job instead.
    pub fn create_job(&self, source: &str) -> Result<JobId> {
        let source = source.trim();
        if source.is_empty() {
            return Err(Error::validation("source reference must not be empty"));
        }

        let job = Job::new(source);
        self.inner.store.put(&job)?;

        self.inner.hub.open(job.id);
        self.inner
            .hub
            .publish(job.id, OutputEvent::StatusChanged(JobState::Created));

        tracing::info!(job_id = %job.id, source = %job.source, "Created conversion job");
        self.dispatch(job.id, job.source);

        Ok(job.id)
    }

    pub fn get_job(&self, id: JobId) -> Result<Job> {
        self.inner.store.get(id)
    }

    /// History listing, oldest first.
    pub fn list_jobs(&self) -> Result<Vec<JobSummary>> {
        Ok(self.inner.store.list()?.iter().map(Job::summary).collect())
    }

    pub fn list_jobs_by_state(&self, state: JobState) -> Result<Vec<JobSummary>> {
        Ok(self
            .inner
            .store
            .list_by_state(state)?
            .iter()
            .map(Job::summary)
            .collect())
    }

    /// Live events for a job.
    ///
    /// A job that is already finished yields its final status and ends. A
    /// job that is not finished but has no worker (after [`shutdown`]) yields
    /// nothing and ends.
    ///
    /// [`shutdown`]: JobEngine::shutdown
    pub fn subscribe(&self, id: JobId) -> Result<Subscription> {
        if let Some(subscription) = self.inner.hub.subscribe(id) {
            return Ok(subscription);
        }

        // No open topic: the job is finished, or no worker owns it any more
        let job = self.inner.store.get(id)?;
        if job.state.is_terminal() {
            Ok(Subscription::finished(job.state))
        } else {
            Ok(Subscription::closed())
        }
    }

    /// Delete a job, cancelling its conversion first if it is running.
    ///
    /// A running job is failed with [`CANCELLED_REASON`] before its record
    /// disappears. Waits at most `cancel_timeout` for the converter to stop;
    /// the record is deleted either way.
    pub async fn delete_job(&self, id: JobId) -> Result<()> {
        let job = self.inner.store.get(id)?;

        let active = self.inner.active.lock().remove(&id);
        if let Some(active) = active {
            tracing::info!(job_id = %id, "Cancelling conversion for deletion");
            active.cancel.cancel();
            match tokio::time::timeout(self.inner.settings.cancel_timeout, active.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(job_id = %id, "Conversion worker failed: {}", e),
                Err(_) => tracing::warn!(
                    job_id = %id,
                    "Conversion worker did not stop in time, deleting anyway"
                ),
            }
        }

        // The worker may have recorded an artifact while we waited
        let output_path = match self.inner.store.get(id) {
            Ok(current) => current.output_path,
            Err(_) => job.output_path,
        };

        self.inner.store.delete(id)?;
        self.inner.hub.close(id);

        if let Some(path) = output_path {
            remove_artifact(id, Path::new(&path)).await;
        }

        tracing::info!(job_id = %id, "Deleted conversion job");
        Ok(())
    }

    /// Number of jobs with a live worker.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().len()
    }

    /// Stop every worker without recording a terminal state.
    ///
    /// Their jobs stay `CONVERTING` (or `CREATED`) in the store and are
    /// handled by recovery on the next start.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let handles: Vec<_> = self
            .inner
            .active
            .lock()
            .drain()
            .map(|(_, active)| active.handle)
            .collect();

        if !handles.is_empty() {
            tracing::info!("Stopping {} active conversions", handles.len());
        }
        for handle in handles {
            if tokio::time::timeout(self.inner.settings.cancel_timeout, handle)
                .await
                .is_err()
            {
                tracing::warn!("Conversion worker did not stop in time");
            }
        }
    }

    fn dispatch(&self, id: JobId, source: String) {
        let mut active = self.inner.active.lock();
        if active.contains_key(&id) {
            tracing::warn!(job_id = %id, "Job already has a worker, not starting another");
            return;
        }

        let cancel = self.inner.shutdown.child_token();
        let engine = self.clone();
        let worker_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            engine.drive(id, &source, &worker_cancel).await;
            // Already closed by `finish` unless the job stopped short of a
            // terminal state
            engine.inner.hub.close(id);
            engine.inner.active.lock().remove(&id);
        });

        active.insert(id, ActiveJob { cancel, handle });
    }

    async fn drive(&self, id: JobId, source: &str, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }

        match self.inner.store.mark_converting(id) {
            Ok(true) => self
                .inner
                .hub
                .publish(id, OutputEvent::StatusChanged(JobState::Converting)),
            Ok(false) => {
                tracing::warn!(job_id = %id, "Job is no longer CREATED, not converting");
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %id, "Failed to mark job converting: {}", e);
                return;
            }
        }

        let Some(_permit) = self.acquire_permit(cancel).await else {
            self.finish(id, Err(ConversionFailure::Cancelled));
            return;
        };

        tracing::debug!(job_id = %id, "Starting converter");
        let mut handle = self.inner.runner.start(id, source, cancel.clone());
        let result = loop {
            match handle.next().await {
                Some(RunnerRecord::Line(text)) => {
                    self.inner.hub.publish(id, OutputEvent::OutputLine(text))
                }
                Some(RunnerRecord::CarriageReturn) => {
                    self.inner.hub.publish(id, OutputEvent::CarriageReturn)
                }
                Some(RunnerRecord::Finished(result)) => break result,
                None => {
                    break Err(ConversionFailure::Io(
                        "converter stopped without reporting a result".to_string(),
                    ))
                }
            }
        };

        self.finish(id, result);
    }

    /// `None` if cancelled while waiting.
    async fn acquire_permit(
        &self,
        cancel: &CancellationToken,
    ) -> Option<Option<OwnedSemaphorePermit>> {
        let Some(permits) = &self.inner.permits else {
            return Some(None);
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = permits.clone().acquire_owned() => permit.ok().map(Some),
        }
    }

    fn finish(&self, id: JobId, result: std::result::Result<ConversionOutput, ConversionFailure>) {
        let store = &self.inner.store;
        let hub = &self.inner.hub;

        match result {
            Ok(output) => match store.mark_successful(
                id,
                &output.artifact_path,
                &output.display_name,
            ) {
                Ok(true) => {
                    tracing::info!(
                        job_id = %id,
                        display_name = %output.display_name,
                        "Conversion completed"
                    );
                    hub.finish(id, JobState::Successful);
                }
                Ok(false) => {
                    // Deleted while converting; nothing owns the file now
                    tracing::debug!(job_id = %id, "Job vanished before completion was recorded");
                    discard_artifact(id, &output.artifact_path);
                }
                Err(e) => {
                    tracing::error!(job_id = %id, "Failed to record completion: {}", e);
                    discard_artifact(id, &output.artifact_path);
                    self.record_failure(id, &format!("failed to record result: {}", e));
                }
            },
            Err(ConversionFailure::Cancelled) if self.inner.shutdown.is_cancelled() => {
                tracing::debug!(job_id = %id, "Conversion stopped by shutdown");
            }
            Err(ConversionFailure::Cancelled) => self.record_failure(id, CANCELLED_REASON),
            Err(failure) => self.record_failure(id, &failure.to_string()),
        }
    }

    fn record_failure(&self, id: JobId, reason: &str) {
        match self.inner.store.mark_failed(id, reason) {
            Ok(true) => {
                tracing::warn!(job_id = %id, reason = %reason, "Conversion failed");
                self.inner.hub.finish(id, JobState::Failed);
            }
            Ok(false) => {
                tracing::debug!(job_id = %id, "Job no longer converting, failure not recorded")
            }
            Err(e) => tracing::error!(job_id = %id, "Failed to record failure: {}", e),
        }
    }
}

fn discard_artifact(id: JobId, path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(job_id = %id, "Failed to remove artifact {:?}: {}", path, e);
        }
    }
}

async fn remove_artifact(id: JobId, path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(job_id = %id, "Removed artifact {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(job_id = %id, "Failed to remove artifact {:?}: {}", path, e),
    }
}
