//! Arena of downloaded model payloads addressed by local handle URLs

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ForgeError, Result};

const HANDLE_SCHEME: &str = "blob:forge3d/";

/// Owner of every live artifact payload.
///
/// Payloads are shared as `Arc<[u8]>` so readers (viewer, export) never copy
/// them; releasing a handle drops the arena's reference.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    live: HashMap<String, Arc<[u8]>>,
    created: u64,
    released: u64,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `bytes` and return a fresh handle URL
    pub fn create(&mut self, bytes: Vec<u8>) -> String {
        let url = format!("{}{}", HANDLE_SCHEME, uuid::Uuid::new_v4());
        self.live.insert(url.clone(), Arc::from(bytes));
        self.created += 1;
        url
    }

    pub fn get(&self, url: &str) -> Result<Arc<[u8]>> {
        self.live
            .get(url)
            .cloned()
            .ok_or_else(|| ForgeError::artifact_released(url))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.live.contains_key(url)
    }

    /// Release a handle. Returns false if it was already released.
    pub fn release(&mut self, url: &str) -> bool {
        if self.live.remove(url).is_some() {
            self.released += 1;
            true
        } else {
            false
        }
    }

    /// Release every live handle, returning how many were freed
    pub fn clear(&mut self) -> usize {
        let count = self.live.len();
        self.live.clear();
        self.released += count as u64;
        count
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Total bytes held by live handles
    pub fn live_bytes(&self) -> u64 {
        self.live.values().map(|b| b.len() as u64).sum()
    }

    /// (created, released) counters since construction
    pub fn stats(&self) -> (u64, u64) {
        (self.created, self.released)
    }

    pub fn is_handle(url: &str) -> bool {
        url.starts_with(HANDLE_SCHEME)
    }
}
