//! Test utilities and helpers for unit tests
//!
//! This module provides common testing utilities including:
//! - Temporary directories and files
//! - Configuration and status fixtures

pub mod test_helpers {
    use std::path::PathBuf;
    use tempfile::TempDir;

    use crate::config::GenerationConfig;

    /// Create a temporary directory for testing
    pub fn create_temp_dir() -> TempDir {
        tempfile::tempdir().expect("Failed to create temp dir")
    }

    /// Create a temporary file with content
    pub fn create_temp_file_with_content(dir: &TempDir, filename: &str, content: &[u8]) -> PathBuf {
        let file_path = dir.path().join(filename);
        std::fs::write(&file_path, content).expect("Failed to write temp file");
        file_path
    }

    /// Default pipeline limits: 3s polling, 5 requests per 10 minutes, 3 concurrent jobs
    pub fn generation_config() -> GenerationConfig {
        GenerationConfig::default()
    }

    /// Status body as the backend sends it
    pub fn status_body(status: &str) -> serde_json::Value {
        serde_json::json!({ "status": status })
    }

    pub fn completed_body(download_url: &str) -> serde_json::Value {
        serde_json::json!({ "status": "completed", "download_url": download_url })
    }

    pub fn failed_body(error: &str) -> serde_json::Value {
        serde_json::json!({ "status": "failed", "error": error })
    }

    /// Bytes standing in for a binary glTF payload
    pub fn glb_bytes() -> Vec<u8> {
        let mut bytes = b"glTF".to_vec();
        bytes.extend_from_slice(&[2, 0, 0, 0]);
        bytes.extend_from_slice(&[0u8; 56]);
        bytes
    }
}
