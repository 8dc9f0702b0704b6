//! Job records and the status state machine

use chrono::{DateTime, Utc};
use forge3d_protocol::common::RemoteJobStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::fs;

use crate::error::{ForgeError, Result};

/// Identifier of a job inside the library.
///
/// Starts as a locally generated temporary id and is replaced by the
/// server-assigned id once submission succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    const TEMP_PREFIX: &'static str = "temp_";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// `temp_<unix millis>_<random suffix>`
    pub fn temporary() -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}{}_{}",
            Self::TEMP_PREFIX,
            Utc::now().timestamp_millis(),
            &suffix[..8]
        ))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(Self::TEMP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Local lifecycle of a job.
///
/// `queued -> processing -> downloading -> completed`, and
/// `queued | processing -> failed`. Terminal states admit no transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Downloading,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Counts against the concurrent job cap
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing | Self::Downloading)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Processing => 1,
            Self::Downloading => 2,
            Self::Completed => 3,
            Self::Failed => 3,
        }
    }

    /// Whether `next` is a forward step along the state machine.
    ///
    /// A download can only start after processing was observed, so
    /// `queued -> downloading` is refused; the poller steps through
    /// `processing` first when the backend jumps straight to `completed`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Completed, _) | (Failed, _) => false,
            (Queued, Processing) => true,
            (Processing, Downloading) => true,
            (Downloading, Completed) => true,
            (Queued, Failed) | (Processing, Failed) | (Downloading, Failed) => true,
            _ => false,
        }
    }

    /// Whether `next` would move backwards, e.g. a late `queued` after `processing`
    pub fn is_regression(&self, next: JobStatus) -> bool {
        next.rank() < self.rank()
    }
}

impl From<RemoteJobStatus> for JobStatus {
    fn from(status: RemoteJobStatus) -> Self {
        match status {
            RemoteJobStatus::Queued => Self::Queued,
            RemoteJobStatus::Processing => Self::Processing,
            RemoteJobStatus::Completed => Self::Completed,
            RemoteJobStatus::Failed => Self::Failed,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Preview image of a job
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "url", rename_all = "lowercase")]
pub enum Thumbnail {
    #[default]
    None,
    /// Generic image shown until a real frame is captured
    Placeholder(String),
    /// Data URL of a captured frame
    Captured(String),
}

impl Thumbnail {
    pub fn needs_capture(&self) -> bool {
        !matches!(self, Self::Captured(_))
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Placeholder(url) | Self::Captured(url) => Some(url),
        }
    }
}

/// Kind of input a job was generated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Text,
    Image,
}

/// An image selected for image-to-3D generation
#[derive(Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl fmt::Debug for ImageUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("filename", &self.filename)
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl ImageUpload {
    pub fn new(filename: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime: mime.into(),
            bytes,
        }
    }

    pub async fn from_path(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                ForgeError::invalid_input(format!("Not a file path: {}", path.display()))
            })?;

        let bytes = fs::read(path).await.map_err(|e| {
            ForgeError::io_from_error(format!("Read image {}", path.display()), e)
        })?;
        if bytes.is_empty() {
            return Err(ForgeError::invalid_input(format!(
                "Image file is empty: {}",
                path.display()
            )));
        }

        let mime = crate::utils::image_mime_for_path(path);
        Ok(Self::new(filename, mime, bytes))
    }
}

/// A generation request as chosen by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobRequest {
    Text { caption: String },
    Image(ImageUpload),
}

impl JobRequest {
    pub fn text(caption: impl Into<String>) -> Self {
        Self::Text {
            caption: caption.into(),
        }
    }

    pub fn image(upload: ImageUpload) -> Self {
        Self::Image(upload)
    }

    /// Label stored on the record: the caption, or the image file name
    pub fn prompt(&self) -> &str {
        match self {
            Self::Text { caption } => caption,
            Self::Image(upload) => &upload.filename,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            Self::Text { .. } => JobKind::Text,
            Self::Image(_) => JobKind::Image,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Text { caption } if caption.trim().is_empty() => Err(
                ForgeError::validation_field("Caption cannot be empty", "caption"),
            ),
            Self::Image(upload) if upload.bytes.is_empty() => Err(
                ForgeError::validation_field("Image cannot be empty", "image"),
            ),
            _ => Ok(()),
        }
    }
}

/// One entry of the library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub prompt: String,
    pub kind: JobKind,
    /// Local artifact handle URL, set once the model is downloaded
    pub url: Option<String>,
    pub thumbnail: Thumbnail,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Optimistic placeholder inserted before the backend has answered
    pub fn placeholder(job_id: JobId, request: &JobRequest) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            prompt: request.prompt().to_string(),
            kind: request.kind(),
            url: None,
            thumbnail: Thumbnail::None,
            status: JobStatus::Queued,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Completed, displayed and still without a real preview
    pub fn awaiting_capture(&self, current_url: &str) -> bool {
        self.status == JobStatus::Completed
            && self.url.as_deref() == Some(current_url)
            && self.thumbnail.needs_capture()
    }
}

/// Partial update of a record. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub url: Option<String>,
    pub thumbnail: Option<Thumbnail>,
    pub error: Option<String>,
}

impl JobPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn thumbnail(mut self, thumbnail: Thumbnail) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Failure patch with the given reason
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::new().status(JobStatus::Failed).error(reason)
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.url.is_none()
            && self.thumbnail.is_none()
            && self.error.is_none()
    }

    /// Check the patch against `record` without mutating it
    pub fn check(&self, record: &JobRecord) -> Result<()> {
        if let Some(next) = self.status {
            if next != record.status && !record.status.can_transition_to(next) {
                return Err(ForgeError::invalid_transition(
                    record.job_id.as_str(),
                    record.status,
                    next,
                ));
            }
        }

        if self.error.is_some() && self.status != Some(JobStatus::Failed) {
            return Err(ForgeError::validation_field(
                "An error can only be set together with the failed status",
                "error",
            ));
        }

        if let Some(thumbnail) = &self.thumbnail {
            if matches!(record.thumbnail, Thumbnail::Captured(_))
                && !matches!(thumbnail, Thumbnail::Captured(_))
            {
                return Err(ForgeError::thumbnail_regression(record.job_id.as_str()));
            }
        }

        Ok(())
    }

    /// Merge into `record`; all-or-nothing
    pub fn apply(self, record: &mut JobRecord) -> Result<()> {
        self.check(record)?;

        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(url) = self.url {
            record.url = Some(url);
        }
        if let Some(thumbnail) = self.thumbnail {
            record.thumbnail = thumbnail;
        }
        if let Some(error) = self.error {
            record.error = Some(error);
        }
        record.updated_at = Utc::now();
        Ok(())
    }
}
