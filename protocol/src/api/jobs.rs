//! Job API DTOs
//!
//! Data transfer objects for the generation backend: submission, status
//! polling and error bodies.

use serde::{Deserialize, Serialize};
use validator::Validate;

pub use crate::common::RemoteJobStatus;

// ============================================================================
// Submission DTOs
// ============================================================================

/// Text-to-3D request
///
/// Used for POST /jobs/text-to-3d endpoint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TextJobRequest {
    #[validate(length(min = 1))]
    pub caption: String,
}

/// Multipart field name carrying the uploaded image for POST /jobs/image-to-3d
pub const IMAGE_FIELD: &str = "image";

/// Submission response shared by both submission endpoints
///
/// `status` is informational only; backends answer with words outside
/// [`RemoteJobStatus`] here (e.g. `accepted`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

// ============================================================================
// Status DTOs
// ============================================================================

/// Job status response
///
/// Response for GET /jobs/{job_id}/status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub status: RemoteJobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_response_optional_fields() {
        let parsed: JobStatusResponse =
            serde_json::from_str(r#"{"status":"processing"}"#).unwrap();
        assert_eq!(parsed.status, RemoteJobStatus::Processing);
        assert!(parsed.download_url.is_none());
        assert!(parsed.error.is_none());

        let parsed: JobStatusResponse = serde_json::from_str(
            r#"{"status":"completed","download_url":"/files/abc.bin"}"#,
        )
        .unwrap();
        assert_eq!(parsed.download_url.as_deref(), Some("/files/abc.bin"));
    }

    #[test]
    fn test_submit_response_accepts_any_status_word() {
        let parsed: SubmitJobResponse =
            serde_json::from_str(r#"{"job_id":"abc","status":"accepted"}"#).unwrap();
        assert_eq!(parsed.job_id, "abc");
        assert_eq!(parsed.status.as_deref(), Some("accepted"));

        let parsed: SubmitJobResponse = serde_json::from_str(r#"{"job_id":"abc"}"#).unwrap();
        assert!(parsed.status.is_none());
    }

    #[test]
    fn test_text_request_validation() {
        let empty = TextJobRequest {
            caption: String::new(),
        };
        assert!(empty.validate().is_err());

        let ok = TextJobRequest {
            caption: "a ceramic mug".to_string(),
        };
        assert!(ok.validate().is_ok());

        let long = TextJobRequest {
            caption: "a tall vase ".repeat(500),
        };
        assert!(long.validate().is_ok());
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({ "caption": "a ceramic mug" })
        );
    }
}
