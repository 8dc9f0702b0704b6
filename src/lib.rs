//! forge3d: asynchronous text/image to 3D generation client.
//!
//! A [`GenerationSession`] submits jobs to a generation backend, polls each
//! one until it finishes, keeps the downloaded models in an in-memory
//! [`Library`], and captures a preview thumbnail once the viewer has rendered
//! a finished model.

pub mod admission;
pub mod artifact;
pub mod capture;
pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod job;
pub mod library;
pub mod poller;
pub mod rate_limit;
pub mod session;
pub mod utils;

#[cfg(test)]
mod tests;

pub use capture::{png_data_url, Viewer};
pub use client::{GenerationApi, HttpGenerationClient};
pub use config::{Config, GenerationConfig};
pub use error::{ErrorCode, ForgeError, Result};
pub use job::{ImageUpload, JobId, JobKind, JobRecord, JobRequest, JobStatus, Thumbnail};
pub use library::Library;
pub use session::{Admission, GenerationSession, SessionEvent};
pub use utils::format_bytes;
