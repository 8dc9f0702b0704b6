//! Backend discovery DTOs

use serde::{Deserialize, Serialize};

/// Discovery response
///
/// Response for GET /api/get-backend-url. A successful lookup carries `url`;
/// a failed one carries `error` together with a non-200 status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendUrlResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
