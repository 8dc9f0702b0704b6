//! API DTOs module
//!
//! This module contains all API data transfer objects organized by domain:
//! - `discovery`: Backend address lookup
//! - `jobs`: Job submission, status and artifact endpoints

pub mod discovery;
pub mod jobs;

pub use discovery::*;
pub use jobs::*;
