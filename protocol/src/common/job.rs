//! Job-related values reported by the generation backend

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status as reported by the backend.
///
/// The backend never reports `downloading`; that state exists only on the
/// client side while the artifact is being fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteJobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RemoteJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RemoteJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}
