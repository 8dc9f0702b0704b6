//! Per-job status polling.
//!
//! Every job with a server-assigned id gets exactly one background task. The
//! task ticks on a fixed period, awaits its own status request before the next
//! tick, and drives the record through `processing -> downloading ->
//! completed`, or to `failed`. The registry owns the task handles so the
//! session can cancel them individually or all at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use forge3d_protocol::api::JobStatusResponse;
use forge3d_protocol::common::RemoteJobStatus;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::GenerationApi;
use crate::job::{JobId, JobPatch, JobStatus};
use crate::session::SessionState;

pub const DEFAULT_FAILURE_MESSAGE: &str = "An unknown error occurred.";
pub const MISSING_DOWNLOAD_URL: &str = "Backend reported completion without a download URL";

/// Background tasks keyed by job id
#[derive(Debug, Default)]
pub struct PollerRegistry {
    tasks: Mutex<HashMap<JobId, JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the task produced by `spawn` unless `job_id` already has a
    /// live one or the registry was disposed. Returns whether a task was
    /// started.
    ///
    /// The lock is held while spawning so a task that finishes immediately
    /// cannot release its entry before it is inserted.
    pub fn start<F>(&self, job_id: JobId, spawn: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut tasks = self.tasks();
        if self.disposed.load(Ordering::Acquire) {
            debug!(%job_id, "registry disposed, not starting poller");
            return false;
        }
        if let Some(existing) = tasks.get(&job_id) {
            if !existing.is_finished() {
                debug!(%job_id, "poller already running");
                return false;
            }
        }
        tasks.insert(job_id, spawn());
        true
    }

    /// Abort and forget the task for `job_id`. Safe to call repeatedly.
    pub fn stop(&self, job_id: &JobId) -> bool {
        match self.tasks().remove(job_id) {
            Some(handle) => {
                handle.abort();
                debug!(%job_id, "poller stopped");
                true
            }
            None => false,
        }
    }

    /// Forget the task without aborting it; called by the task on exit
    pub fn release(&self, job_id: &JobId) -> bool {
        self.tasks().remove(job_id).is_some()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.tasks().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks().is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Abort every task and refuse new ones. Returns how many were still
    /// registered.
    pub fn dispose(&self) -> usize {
        let drained: Vec<(JobId, JoinHandle<()>)> = {
            let mut tasks = self.tasks();
            self.disposed.store(true, Ordering::Release);
            tasks.drain().collect()
        };
        for (_, handle) in &drained {
            handle.abort();
        }
        drained.len()
    }
}

impl Drop for PollerRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Poll `job_id` until it reaches a terminal state.
pub(crate) async fn poll_job<C: GenerationApi>(
    client: Arc<C>,
    state: Arc<SessionState>,
    backend: String,
    job_id: JobId,
) {
    let period = state.config.poll_interval();
    let max_failures = state.config.max_consecutive_poll_failures;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut consecutive_failures = 0u32;

    debug!(%job_id, period_ms = period.as_millis() as u64, "polling started");

    loop {
        ticker.tick().await;

        match client.job_status(&backend, &job_id).await {
            Ok(response) => {
                consecutive_failures = 0;
                let flow = handle_status(client.as_ref(), &state, &backend, &job_id, response).await;
                if let Flow::Stop = flow {
                    break;
                }
            }
            Err(e) if !e.is_retryable() => {
                warn!(%job_id, error = %e, "status check rejected");
                state.fail(&job_id, e.user_message());
                break;
            }
            Err(e) => {
                consecutive_failures += 1;
                warn!(
                    %job_id,
                    attempt = consecutive_failures,
                    max = max_failures,
                    error = %e,
                    "status check failed"
                );
                if consecutive_failures >= max_failures {
                    state.fail(
                        &job_id,
                        format!("Lost contact with generation backend: {}", e.user_message()),
                    );
                    break;
                }
            }
        }
    }

    state.task_finished(&job_id);
}

async fn handle_status<C: GenerationApi>(
    client: &C,
    state: &SessionState,
    backend: &str,
    job_id: &JobId,
    response: JobStatusResponse,
) -> Flow {
    let Some(current) = state.status_of(job_id) else {
        debug!(%job_id, "record gone, stopping poller");
        return Flow::Stop;
    };
    if current.is_terminal() {
        return Flow::Stop;
    }

    match response.status {
        RemoteJobStatus::Queued | RemoteJobStatus::Processing => {
            let next = JobStatus::from(response.status);
            if next == current {
                return Flow::Continue;
            }
            if current.is_regression(next) {
                debug!(%job_id, %current, %next, "ignoring regressing status");
                return Flow::Continue;
            }
            match state.patch(job_id, JobPatch::new().status(next)) {
                Ok(_) => Flow::Continue,
                Err(e) => {
                    warn!(%job_id, error = %e, "status update rejected");
                    Flow::Continue
                }
            }
        }
        RemoteJobStatus::Failed => {
            let reason = response
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_FAILURE_MESSAGE.to_string());
            info!(%job_id, %reason, "backend reported failure");
            state.fail(job_id, reason);
            Flow::Stop
        }
        RemoteJobStatus::Completed => {
            match response.download_url.filter(|u| !u.trim().is_empty()) {
                Some(download_path) => {
                    complete_job(client, state, backend, job_id, current, &download_path).await;
                }
                None => state.fail(job_id, MISSING_DOWNLOAD_URL),
            }
            Flow::Stop
        }
    }
}

async fn complete_job<C: GenerationApi>(
    client: &C,
    state: &SessionState,
    backend: &str,
    job_id: &JobId,
    current: JobStatus,
    download_path: &str,
) {
    if current == JobStatus::Queued {
        if let Err(e) = state.patch(job_id, JobPatch::new().status(JobStatus::Processing)) {
            warn!(%job_id, error = %e, "could not advance to processing");
            return;
        }
    }
    if let Err(e) = state.patch(job_id, JobPatch::new().status(JobStatus::Downloading)) {
        warn!(%job_id, error = %e, "could not advance to downloading");
        return;
    }

    let bytes = match client.download(backend, download_path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(%job_id, error = %e, "artifact download failed");
            state.fail(job_id, e.user_message());
            return;
        }
    };

    let size = bytes.len();
    match state.attach_artifact(job_id, bytes) {
        Ok(url) => info!(%job_id, %url, size, "model ready"),
        Err(e) => {
            warn!(%job_id, error = %e, "could not store artifact");
            state.fail(job_id, e.user_message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;

    #[tokio::test]
    async fn test_start_is_noop_when_running() {
        let registry = PollerRegistry::new();
        let id = JobId::new("job-1");

        assert!(registry.start(id.clone(), || tokio::spawn(pending())));
        let mut spawned_again = false;
        assert!(!registry.start(id.clone(), || {
            spawned_again = true;
            tokio::spawn(pending())
        }));
        assert!(!spawned_again);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let registry = PollerRegistry::new();
        let id = JobId::new("job-1");
        registry.start(id.clone(), || tokio::spawn(pending()));

        assert!(registry.stop(&id));
        assert!(!registry.stop(&id));
        assert!(!registry.contains(&id));
        assert!(!registry.release(&id));
    }

    #[tokio::test]
    async fn test_stop_aborts_task() {
        let registry = PollerRegistry::new();
        let id = JobId::new("job-1");
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        registry.start(id.clone(), || {
            tokio::spawn(async move {
                pending::<()>().await;
                let _ = tx.send(());
            })
        });

        registry.stop(&id);
        // Sender dropped by the abort, never sent
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_dispose_aborts_everything() {
        let registry = PollerRegistry::new();
        for i in 0..3 {
            registry.start(JobId::new(format!("job-{}", i)), || tokio::spawn(pending()));
        }
        assert_eq!(registry.dispose(), 3);
        assert!(registry.is_empty());
        assert_eq!(registry.dispose(), 0);
    }

    #[tokio::test]
    async fn test_start_after_dispose_is_refused() {
        let registry = PollerRegistry::new();
        registry.dispose();

        let mut spawned = false;
        assert!(!registry.start(JobId::new("late"), || {
            spawned = true;
            tokio::spawn(pending())
        }));
        assert!(!spawned);
        assert!(registry.is_disposed());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_finished_entry_can_be_restarted() {
        let registry = PollerRegistry::new();
        let id = JobId::new("job-1");
        registry.start(id.clone(), || tokio::spawn(async {}));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(registry.start(id, || tokio::spawn(pending())));
    }
}
