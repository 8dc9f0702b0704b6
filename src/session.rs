//! Generation session: the owner of every piece of shared generation state.
//!
//! A session ties together the library, the rate limiter, admission control,
//! the poller registry and the capture slot. Submission, polling and capture
//! all mutate the library through the same insert / update-by-id primitives
//! exposed here, and every mutation is announced on a broadcast channel so a
//! front-end can follow along without holding the library lock.
//!
//! Locks are never held across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::admission::AdmissionControl;
use crate::capture::{run_capture, CaptureSlot, Viewer};
use crate::client::GenerationApi;
use crate::config::GenerationConfig;
use crate::error::{ForgeError, Result};
use crate::export::export_model;
use crate::job::{JobId, JobPatch, JobRecord, JobRequest, JobStatus, Thumbnail};
use crate::library::Library;
use crate::poller::{poll_job, PollerRegistry};
use crate::rate_limit::RateLimiter;

const EVENT_CAPACITY: usize = 256;

/// Library and viewer changes, in the order they were applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    JobInserted { job_id: JobId },
    /// Temporary id replaced by the server-assigned one
    JobRenamed { from: JobId, to: JobId },
    JobUpdated { job_id: JobId, status: JobStatus },
    JobRemoved { job_id: JobId },
    CurrentModelChanged { url: Option<String> },
    ThumbnailCaptured { job_id: JobId },
}

/// Outcome of a submission that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Placeholder inserted under this temporary id
    Accepted(JobId),
    /// Another submission is still in flight; nothing was done
    AlreadySubmitting,
}

pub(crate) struct SessionState {
    pub(crate) config: GenerationConfig,
    library: Mutex<Library>,
    limiter: Mutex<RateLimiter>,
    admission: AdmissionControl,
    pollers: PollerRegistry,
    capture: Mutex<CaptureSlot>,
    viewer: Mutex<Option<Arc<dyn Viewer>>>,
    submitting: AtomicBool,
    settled: Notify,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionState {
    fn new(config: GenerationConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            library: Mutex::new(Library::with_capacity(config.library_capacity)),
            limiter: Mutex::new(RateLimiter::new(config.max_requests, config.rate_window())),
            admission: AdmissionControl::new(config.max_concurrent_jobs),
            pollers: PollerRegistry::new(),
            capture: Mutex::new(CaptureSlot::default()),
            viewer: Mutex::new(None),
            submitting: AtomicBool::new(false),
            settled: Notify::new(),
            events,
            config,
        }
    }

    fn library(&self) -> MutexGuard<'_, Library> {
        self.library.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn limiter(&self) -> MutexGuard<'_, RateLimiter> {
        self.limiter.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn capture(&self) -> MutexGuard<'_, CaptureSlot> {
        self.capture.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn viewer(&self) -> Option<Arc<dyn Viewer>> {
        self.viewer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    pub(crate) fn status_of(&self, job_id: &JobId) -> Option<JobStatus> {
        self.library().get(job_id).map(|r| r.status)
    }

    /// Apply a patch by id and announce the resulting status
    pub(crate) fn patch(&self, job_id: &JobId, patch: JobPatch) -> Result<JobStatus> {
        let status = self.library().update(job_id, patch)?.status;
        debug!(%job_id, %status, "job updated");
        self.emit(SessionEvent::JobUpdated {
            job_id: job_id.clone(),
            status,
        });
        Ok(status)
    }

    /// Move a job to `failed`. Failures to do so are logged, never raised.
    pub(crate) fn fail(&self, job_id: &JobId, reason: impl Into<String>) {
        let reason = reason.into();
        match self.patch(job_id, JobPatch::failed(reason.clone())) {
            Ok(_) => info!(%job_id, %reason, "job failed"),
            Err(e) => warn!(%job_id, error = %e, "could not mark job failed"),
        }
    }

    fn rename(&self, from: &JobId, to: JobId) -> Result<()> {
        self.library()
            .rename(from, to.clone(), JobStatus::Processing)?;
        self.emit(SessionEvent::JobRenamed {
            from: from.clone(),
            to: to.clone(),
        });
        self.emit(SessionEvent::JobUpdated {
            job_id: to,
            status: JobStatus::Processing,
        });
        Ok(())
    }

    /// Store a downloaded model, complete the job and show it in the viewer
    pub(crate) fn attach_artifact(&self, job_id: &JobId, bytes: Vec<u8>) -> Result<String> {
        let url = {
            let mut library = self.library();
            let url = library.attach_artifact(job_id, bytes, &self.config.placeholder_thumbnail)?;
            library.set_current_model(Some(url.clone()))?;
            url
        };
        self.emit(SessionEvent::JobUpdated {
            job_id: job_id.clone(),
            status: JobStatus::Completed,
        });
        self.model_changed(Some(url.clone()));
        Ok(url)
    }

    fn set_current_model(&self, url: Option<String>) -> Result<()> {
        self.library().set_current_model(url.clone())?;
        self.model_changed(url);
        Ok(())
    }

    fn model_changed(&self, url: Option<String>) {
        self.capture().cancel_unless(url.as_deref());
        self.emit(SessionEvent::CurrentModelChanged { url });
    }

    pub(crate) fn still_awaiting_capture(&self, job_id: &JobId, model_url: &str) -> bool {
        let library = self.library();
        library.current_model() == Some(model_url)
            && library
                .get(job_id)
                .is_some_and(|r| r.awaiting_capture(model_url))
    }

    pub(crate) fn write_thumbnail(&self, job_id: &JobId, thumbnail: Thumbnail) -> Result<()> {
        let captured = matches!(thumbnail, Thumbnail::Captured(_));
        self.library()
            .update(job_id, JobPatch::new().thumbnail(thumbnail))?;
        if captured {
            self.emit(SessionEvent::ThumbnailCaptured {
                job_id: job_id.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn task_finished(&self, job_id: &JobId) {
        self.pollers.release(job_id);
        self.settled.notify_waiters();
    }

    pub(crate) fn capture_finished(&self, model_url: &str) {
        self.capture().finish(model_url);
        self.settled.notify_waiters();
    }

    fn is_settled(&self) -> bool {
        self.pollers.is_empty() && !self.capture().is_running()
    }
}

/// Clears the in-flight flag when the submission ends, however it ends
struct InFlight {
    state: Arc<SessionState>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.state.submitting.store(false, Ordering::Release);
    }
}

/// Explicitly owned generation state for one user session.
///
/// Dropping the session stops every poller and capture task and releases
/// every downloaded model.
pub struct GenerationSession<C: GenerationApi> {
    client: Arc<C>,
    state: Arc<SessionState>,
}

impl<C: GenerationApi> GenerationSession<C> {
    /// Create a session; rejects a configuration the poller cannot run with
    pub fn new(client: C, config: GenerationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            client: Arc::new(client),
            state: Arc::new(SessionState::new(config)),
        })
    }

    pub fn with_viewer(self, viewer: Arc<dyn Viewer>) -> Self {
        self.attach_viewer(viewer);
        self
    }

    pub fn attach_viewer(&self, viewer: Arc<dyn Viewer>) {
        *self.state.viewer.lock().unwrap_or_else(|e| e.into_inner()) = Some(viewer);
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.state.config
    }

    /// Submit a generation job.
    ///
    /// Checks, in order: a submission is not already in flight (silent
    /// `AlreadySubmitting`), the rate limit, and the concurrent job cap. On
    /// success a `queued` placeholder is in the library before this returns;
    /// the network round trip happens in the background.
    pub fn submit_job(&self, request: JobRequest) -> Result<Admission> {
        if self.state.pollers.is_disposed() {
            return Err(ForgeError::internal("Session has been disposed"));
        }
        request.validate()?;

        if self
            .state
            .submitting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("submission already in flight, ignoring");
            return Ok(Admission::AlreadySubmitting);
        }
        let in_flight = InFlight {
            state: self.state.clone(),
        };

        let now = Instant::now();
        {
            let limiter = self.state.limiter();
            if limiter.is_limited(now) {
                let retry_after = limiter.retry_after(now).unwrap_or_default();
                return Err(ForgeError::rate_limited(
                    limiter.max_requests(),
                    limiter.window(),
                    retry_after,
                ));
            }
        }

        let temp_id = JobId::temporary();
        {
            let mut library = self.state.library();
            self.state.admission.check(&library)?;
            let evicted = library.insert(JobRecord::placeholder(temp_id.clone(), &request))?;
            if !evicted.is_empty() {
                debug!(count = evicted.len(), "evicted finished jobs");
            }
        }
        self.state.emit(SessionEvent::JobInserted {
            job_id: temp_id.clone(),
        });
        info!(job_id = %temp_id, kind = ?request.kind(), prompt = request.prompt(), "job queued");

        let client = self.client.clone();
        let state = self.state.clone();
        let id = temp_id.clone();
        self.state.pollers.start(temp_id.clone(), move || {
            tokio::spawn(run_submission(client, state, id, request, in_flight))
        });

        Ok(Admission::Accepted(temp_id))
    }

    /// Read access to the library
    pub fn library<R>(&self, read: impl FnOnce(&Library) -> R) -> R {
        read(&*self.state.library())
    }

    pub fn record(&self, job_id: &JobId) -> Option<JobRecord> {
        self.state.library().get(job_id).cloned()
    }

    pub fn is_submitting(&self) -> bool {
        self.state.submitting.load(Ordering::Acquire)
    }

    pub fn is_rate_limited(&self) -> bool {
        self.state.limiter().is_limited(Instant::now())
    }

    pub fn remaining_requests(&self) -> usize {
        self.state.limiter().remaining(Instant::now())
    }

    /// Jobs counting against the concurrent cap, derived from the library
    pub fn active_jobs(&self) -> usize {
        self.state.library().active_count()
    }

    /// Jobs with a live background task (submission or polling)
    pub fn running_tasks(&self) -> usize {
        self.state.pollers.len()
    }

    pub fn is_polling(&self, job_id: &JobId) -> bool {
        self.state.pollers.contains(job_id)
    }

    /// Point the viewer at a model; `None` shows the static default
    pub fn set_current_model(&self, url: Option<String>) -> Result<()> {
        self.state.set_current_model(url)
    }

    pub fn current_model(&self) -> Option<String> {
        self.state.library().current_model().map(|s| s.to_string())
    }

    pub fn update_thumbnail(&self, job_id: &JobId, thumbnail: Thumbnail) -> Result<()> {
        self.state.write_thumbnail(job_id, thumbnail)
    }

    /// The viewer finished loading the current model.
    ///
    /// Schedules a capture when the current model belongs to a completed job
    /// still showing its placeholder. Returns whether a capture is scheduled.
    pub fn notify_model_loaded(&self) -> bool {
        let Some(viewer) = self.state.viewer() else {
            debug!("no viewer attached, skipping capture");
            return false;
        };

        let Some((job_id, model_url)) = self.state.library().pending_capture().and_then(|r| {
            r.url.clone().map(|url| (r.job_id.clone(), url))
        }) else {
            return false;
        };

        let mut slot = self.state.capture();
        if slot.target() == Some(model_url.as_str()) {
            debug!(%job_id, "capture already scheduled");
            return true;
        }

        debug!(%job_id, url = %model_url, "scheduling thumbnail capture");
        let state = self.state.clone();
        let handle = tokio::spawn(run_capture(state, viewer, job_id, model_url.clone()));
        slot.begin(model_url, handle);
        true
    }

    pub fn capture_in_progress(&self) -> bool {
        self.state.capture().is_running()
    }

    pub fn artifact_bytes(&self, url: &str) -> Result<Arc<[u8]>> {
        self.state.library().artifact(url)
    }

    /// Save a completed job's model under `dir`
    pub async fn export_job(&self, job_id: &JobId, dir: &Path, force: bool) -> Result<PathBuf> {
        let (prompt, bytes) = {
            let library = self.state.library();
            let record = library
                .get(job_id)
                .ok_or_else(|| ForgeError::job_not_found(job_id.as_str()))?;
            let url = record
                .url
                .as_deref()
                .filter(|_| record.status == JobStatus::Completed)
                .ok_or_else(|| {
                    ForgeError::export(format!("Job {} has no downloaded model", job_id))
                })?;
            (record.prompt.clone(), library.artifact(url)?)
        };
        export_model(dir, &prompt, &bytes, force).await
    }

    /// Stop any task for the job, drop its record and release its model
    pub fn remove_job(&self, job_id: &JobId) -> Result<JobRecord> {
        self.state.pollers.stop(job_id);
        let (record, pointer_reset) = {
            let mut library = self.state.library();
            let before = library.current_model().map(|s| s.to_string());
            let record = library.remove(job_id)?;
            (record, before.is_some() && library.current_model().is_none())
        };
        self.state.emit(SessionEvent::JobRemoved {
            job_id: job_id.clone(),
        });
        if pointer_reset {
            self.state.model_changed(None);
        }
        self.state.settled.notify_waiters();
        Ok(record)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.state.events.subscribe()
    }

    /// Wait until no submission, poller or capture task is running
    pub async fn wait_until_settled(&self) {
        loop {
            let notified = self.state.settled.notified();
            if self.state.is_settled() {
                return;
            }
            notified.await;
        }
    }

    /// Stop every background task and release every downloaded model.
    /// Calling it again is a no-op.
    pub fn dispose(&self) {
        let tasks = self.state.pollers.dispose();
        let capture = self.state.capture().cancel();
        let released = self.state.library().clear();
        self.state.submitting.store(false, Ordering::Release);
        if tasks > 0 || capture || released > 0 {
            debug!(tasks, capture, released, "session disposed");
        }
        self.state.settled.notify_waiters();
    }
}

impl<C: GenerationApi> Drop for GenerationSession<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn run_submission<C: GenerationApi>(
    client: Arc<C>,
    state: Arc<SessionState>,
    temp_id: JobId,
    request: JobRequest,
    in_flight: InFlight,
) {
    match submit_remote(client.as_ref(), &request).await {
        Ok((backend, server_id)) => {
            state.limiter().record(Instant::now());
            match state.rename(&temp_id, server_id.clone()) {
                Ok(()) => {
                    info!(%temp_id, job_id = %server_id, "backend accepted job");
                    let poll_client = client.clone();
                    let poll_state = state.clone();
                    let id = server_id.clone();
                    state.pollers.start(server_id, move || {
                        tokio::spawn(poll_job(poll_client, poll_state, backend, id))
                    });
                }
                Err(e) => {
                    warn!(%temp_id, job_id = %server_id, error = %e, "could not adopt server id");
                    state.fail(&temp_id, e.user_message());
                }
            }
        }
        Err(e) => {
            warn!(job_id = %temp_id, error = %e, "submission failed");
            state.fail(&temp_id, e.user_message());
        }
    }

    drop(in_flight);
    state.task_finished(&temp_id);
}

async fn submit_remote<C: GenerationApi>(
    client: &C,
    request: &JobRequest,
) -> Result<(String, JobId)> {
    let backend = client.resolve_backend().await?;
    let response = client.submit(&backend, request).await?;
    if response.job_id.trim().is_empty() {
        return Err(ForgeError::invalid_response(
            "Backend response did not include a job id",
        ));
    }
    Ok((backend, JobId::new(response.job_id)))
}
