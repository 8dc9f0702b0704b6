//! One-shot thumbnail capture for the model shown in the viewer.
//!
//! When the viewer reports that the current model finished loading and that
//! model belongs to a completed job still showing the placeholder, a single
//! capture task waits for the settle delay, checks the condition again, takes
//! a snapshot and writes it back as the job's thumbnail.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::job::{JobId, Thumbnail};
use crate::session::SessionState;
use crate::utils::{decode_data_url, encode_data_url};

/// Rendering surface able to snapshot its current frame
pub trait Viewer: Send + Sync + 'static {
    /// Current frame as an image data URL
    fn snapshot(&self) -> Result<String>;
}

/// Encode PNG bytes as a `data:image/png;base64,...` URL
pub fn png_data_url(png: &[u8]) -> String {
    encode_data_url("image/png", png)
}

/// The capture task in flight, if any, with the model URL it targets
#[derive(Debug, Default)]
pub struct CaptureSlot {
    task: Option<(String, JoinHandle<()>)>,
}

impl CaptureSlot {
    pub fn target(&self) -> Option<&str> {
        self.task
            .as_ref()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(url, _)| url.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.target().is_some()
    }

    pub(crate) fn begin(&mut self, model_url: String, handle: JoinHandle<()>) {
        self.cancel();
        self.task = Some((model_url, handle));
    }

    /// Abort the in-flight capture. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some((url, handle)) => {
                let was_running = !handle.is_finished();
                handle.abort();
                if was_running {
                    debug!(%url, "capture cancelled");
                }
                was_running
            }
            None => false,
        }
    }

    /// Cancel unless the in-flight capture targets `model_url`
    pub fn cancel_unless(&mut self, model_url: Option<&str>) -> bool {
        match (&self.task, model_url) {
            (Some((target, _)), Some(url)) if target == url => false,
            _ => self.cancel(),
        }
    }

    /// Clear the slot from inside the finishing task
    pub(crate) fn finish(&mut self, model_url: &str) {
        if matches!(&self.task, Some((target, _)) if target == model_url) {
            self.task = None;
        }
    }
}

impl Drop for CaptureSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub(crate) async fn run_capture(
    state: Arc<SessionState>,
    viewer: Arc<dyn Viewer>,
    job_id: JobId,
    model_url: String,
) {
    sleep(state.config.settle_delay()).await;

    if state.still_awaiting_capture(&job_id, &model_url) {
        match viewer.snapshot() {
            Ok(data_url) if data_url.len() > state.config.min_snapshot_len => {
                match decode_data_url(&data_url) {
                    Ok((mime, _)) if mime.starts_with("image/") => {
                        let size = data_url.len();
                        match state.write_thumbnail(&job_id, Thumbnail::Captured(data_url)) {
                            Ok(()) => info!(%job_id, size, "thumbnail captured"),
                            Err(e) => warn!(%job_id, error = %e, "could not store thumbnail"),
                        }
                    }
                    Ok((mime, _)) => {
                        debug!(%job_id, %mime, "snapshot is not an image, keeping placeholder");
                    }
                    Err(e) => warn!(%job_id, error = %e, "unreadable snapshot, keeping placeholder"),
                }
            }
            Ok(data_url) => {
                debug!(%job_id, size = data_url.len(), "snapshot too small, keeping placeholder");
            }
            Err(e) => warn!(%job_id, error = %e, "snapshot failed, keeping placeholder"),
        }
    } else {
        debug!(%job_id, "capture no longer needed");
    }

    state.capture_finished(&model_url);
}
