//! Concurrent job cap, derived from the live library on every check

use crate::error::{ForgeError, Result};
use crate::library::Library;

#[derive(Debug, Clone, Copy)]
pub struct AdmissionControl {
    max_concurrent: usize,
}

impl AdmissionControl {
    pub fn new(max_concurrent: usize) -> Self {
        Self { max_concurrent }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn headroom(&self, library: &Library) -> usize {
        self.max_concurrent.saturating_sub(library.active_count())
    }

    pub fn check(&self, library: &Library) -> Result<()> {
        let active = library.active_count();
        if active >= self.max_concurrent {
            return Err(ForgeError::queue_full(active, self.max_concurrent));
        }
        Ok(())
    }
}
