//! Library state store: the ordered set of job records, the artifacts they
//! own, and the pointer to the model currently shown in the viewer.
//!
//! Every mutation targets a record by id. Records keep insertion order;
//! newest-first and grouped orderings are derived views.

use std::sync::Arc;
use tracing::debug;

use crate::artifact::ArtifactStore;
use crate::error::{ForgeError, Result};
use crate::job::{JobId, JobPatch, JobRecord, JobStatus, Thumbnail};

pub const ITEMS_PER_PAGE: usize = 9;

#[derive(Debug, Default)]
pub struct Library {
    records: Vec<JobRecord>,
    artifacts: ArtifactStore,
    current_model: Option<String>,
    capacity: Option<usize>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library that evicts the oldest finished records beyond `capacity`
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    fn position(&self, job_id: &JobId) -> Option<usize> {
        self.records.iter().position(|r| &r.job_id == job_id)
    }

    fn record_mut(&mut self, job_id: &JobId) -> Result<&mut JobRecord> {
        self.records
            .iter_mut()
            .find(|r| &r.job_id == job_id)
            .ok_or_else(|| ForgeError::job_not_found(job_id.as_str()))
    }

    pub fn get(&self, job_id: &JobId) -> Option<&JobRecord> {
        self.records.iter().find(|r| &r.job_id == job_id)
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.position(job_id).is_some()
    }

    /// Insert a new record. Returns the ids evicted to stay within capacity.
    pub fn insert(&mut self, record: JobRecord) -> Result<Vec<JobId>> {
        if self.contains(&record.job_id) {
            return Err(ForgeError::duplicate_job(record.job_id.as_str()));
        }
        self.records.push(record);
        Ok(self.evict_over_capacity())
    }

    fn evict_over_capacity(&mut self) -> Vec<JobId> {
        let Some(capacity) = self.capacity else {
            return Vec::new();
        };

        let mut evicted = Vec::new();
        while self.records.len() > capacity {
            let Some(idx) = self.records.iter().position(|r| r.status.is_terminal()) else {
                break;
            };
            let record = self.records.remove(idx);
            self.release_record_artifact(&record);
            debug!(job_id = %record.job_id, "evicted from library");
            evicted.push(record.job_id);
        }
        evicted
    }

    fn release_record_artifact(&mut self, record: &JobRecord) {
        if let Some(url) = &record.url {
            self.artifacts.release(url);
            if self.current_model.as_deref() == Some(url.as_str()) {
                self.current_model = None;
            }
        }
    }

    /// Partial update by id. A replaced artifact handle is released.
    pub fn update(&mut self, job_id: &JobId, patch: JobPatch) -> Result<&JobRecord> {
        if let Some(url) = &patch.url {
            if ArtifactStore::is_handle(url) && !self.artifacts.contains(url) {
                return Err(ForgeError::artifact_released(url.as_str()));
            }
        }

        let record = self.record_mut(job_id)?;
        let previous_url = record.url.clone();
        patch.apply(record)?;
        let new_url = record.url.clone();

        if let Some(old) = previous_url {
            if new_url.as_deref() != Some(old.as_str()) {
                self.artifacts.release(&old);
                if self.current_model.as_deref() == Some(old.as_str()) {
                    self.current_model = new_url;
                }
            }
        }

        self.get(job_id)
            .ok_or_else(|| ForgeError::internal("record vanished during update"))
    }

    /// Replace a temporary id with the server-assigned one in a single step
    pub fn rename(&mut self, from: &JobId, to: JobId, status: JobStatus) -> Result<()> {
        if from != &to && self.contains(&to) {
            return Err(ForgeError::duplicate_job(to.as_str()));
        }

        let record = self.record_mut(from)?;
        JobPatch::new().status(status).apply(record)?;
        record.job_id = to;
        Ok(())
    }

    /// Store a downloaded payload and complete the job.
    ///
    /// The record moves to `completed` with a fresh handle URL and the
    /// placeholder thumbnail (unless a frame was already captured). Returns
    /// the handle URL.
    pub fn attach_artifact(
        &mut self,
        job_id: &JobId,
        bytes: Vec<u8>,
        placeholder: &str,
    ) -> Result<String> {
        let record = self
            .get(job_id)
            .ok_or_else(|| ForgeError::job_not_found(job_id.as_str()))?;
        let mut patch = JobPatch::new().status(JobStatus::Completed);
        if record.thumbnail.needs_capture() {
            patch = patch.thumbnail(Thumbnail::Placeholder(placeholder.to_string()));
        }
        patch.check(record)?;

        let url = self.artifacts.create(bytes);
        self.update(job_id, patch.url(url.clone()))?;
        Ok(url)
    }

    /// Drop a record and release its artifact
    pub fn remove(&mut self, job_id: &JobId) -> Result<JobRecord> {
        let idx = self
            .position(job_id)
            .ok_or_else(|| ForgeError::job_not_found(job_id.as_str()))?;
        let record = self.records.remove(idx);
        self.release_record_artifact(&record);
        Ok(record)
    }

    /// Point the viewer at `url`, or at the static default model with `None`
    pub fn set_current_model(&mut self, url: Option<String>) -> Result<()> {
        if let Some(url) = &url {
            if ArtifactStore::is_handle(url) && !self.artifacts.contains(url) {
                return Err(ForgeError::artifact_released(url.as_str()));
            }
        }
        self.current_model = url;
        Ok(())
    }

    pub fn current_model(&self) -> Option<&str> {
        self.current_model.as_deref()
    }

    pub fn artifact(&self, url: &str) -> Result<Arc<[u8]>> {
        self.artifacts.get(url)
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Completed record shown in the viewer that still has no captured frame
    pub fn pending_capture(&self) -> Option<&JobRecord> {
        let current = self.current_model.as_deref()?;
        self.records.iter().find(|r| r.awaiting_capture(current))
    }

    /// Jobs counting against the concurrency cap, recomputed on every call
    pub fn active_count(&self) -> usize {
        self.records.iter().filter(|r| r.status.is_active()).count()
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn newest_first(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.iter().rev()
    }

    /// Active jobs first, then finished ones; newest first within each group
    pub fn display_order(&self) -> Vec<&JobRecord> {
        let (mut active, finished): (Vec<_>, Vec<_>) =
            self.newest_first().partition(|r| r.status.is_active());
        active.extend(finished);
        active
    }

    /// 1-based page of `display_order`
    pub fn page(&self, page: usize) -> Vec<&JobRecord> {
        let start = page.saturating_sub(1) * ITEMS_PER_PAGE;
        self.display_order()
            .into_iter()
            .skip(start)
            .take(ITEMS_PER_PAGE)
            .collect()
    }

    /// Number of pages; an empty library still has one
    pub fn page_count(&self) -> usize {
        self.records.len().div_ceil(ITEMS_PER_PAGE).max(1)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record and release every artifact
    pub fn clear(&mut self) -> usize {
        self.records.clear();
        self.current_model = None;
        self.artifacts.clear()
    }
}
