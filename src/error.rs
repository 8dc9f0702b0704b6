//! Unified error handling for the forge3d generation client
//!
//! This module provides:
//! - Unique error codes for debugging and documentation
//! - Structured error information with context
//! - Convenient constructor methods
//! - Automatic conversions from common error types

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Unified Result type for all forge3d operations
pub type Result<T> = std::result::Result<T, ForgeError>;

/// Error codes for forge3d operations
///
/// Each error has a unique code in the format `FXXX` where:
/// - F1XX: Admission errors (rejected before a job exists)
/// - F2XX: Network and API errors
/// - F3XX: File and I/O errors
/// - F4XX: Configuration errors
/// - F5XX: Validation and input errors
/// - F6XX: Job lifecycle errors
/// - F7XX: Artifact errors
/// - F8XX: Thumbnail capture errors
/// - F9XX: Internal errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Admission (F1XX)
    /// F101: Rate limit window exhausted
    RateLimited,
    /// F102: Too many active jobs
    QueueFull,

    // Network (F2XX)
    /// F201: HTTP request failed
    HttpError,
    /// F202: Connection timeout
    ConnectionTimeout,
    /// F203: Connection refused
    ConnectionRefused,
    /// F204: API returned error response
    ApiError,
    /// F205: Invalid API response format
    InvalidResponse,
    /// F206: Backend address could not be resolved
    DiscoveryFailed,

    // File/IO (F3XX)
    /// F301: File not found
    FileNotFound,
    /// F302: File read error
    FileReadError,
    /// F303: File write error
    FileWriteError,
    /// F304: File already exists
    FileAlreadyExists,

    // Configuration (F4XX)
    /// F401: Configuration error
    ConfigError,
    /// F402: Invalid endpoint URL
    InvalidEndpoint,

    // Validation (F5XX)
    /// F501: Invalid input
    InvalidInput,
    /// F502: Validation failed
    ValidationFailed,

    // Job lifecycle (F6XX)
    /// F601: Job not found in the library
    JobNotFound,
    /// F602: Job id already present in the library
    DuplicateJob,
    /// F603: Status change not allowed by the state machine
    InvalidTransition,
    /// F604: Captured thumbnail would be replaced by a placeholder
    ThumbnailRegression,
    /// F605: Job ended in the failed state
    JobFailed,

    // Artifact (F7XX)
    /// F701: Artifact download failed
    DownloadFailed,
    /// F702: Artifact handle unknown or already released
    ArtifactReleased,
    /// F703: Artifact export failed
    ExportFailed,

    // Capture (F8XX)
    /// F801: Snapshot failed or was rejected
    CaptureFailed,

    // Internal (F9XX)
    /// F901: Internal error
    InternalError,
    /// F902: Serialization error
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::RateLimited => 101,
            ErrorCode::QueueFull => 102,

            ErrorCode::HttpError => 201,
            ErrorCode::ConnectionTimeout => 202,
            ErrorCode::ConnectionRefused => 203,
            ErrorCode::ApiError => 204,
            ErrorCode::InvalidResponse => 205,
            ErrorCode::DiscoveryFailed => 206,

            ErrorCode::FileNotFound => 301,
            ErrorCode::FileReadError => 302,
            ErrorCode::FileWriteError => 303,
            ErrorCode::FileAlreadyExists => 304,

            ErrorCode::ConfigError => 401,
            ErrorCode::InvalidEndpoint => 402,

            ErrorCode::InvalidInput => 501,
            ErrorCode::ValidationFailed => 502,

            ErrorCode::JobNotFound => 601,
            ErrorCode::DuplicateJob => 602,
            ErrorCode::InvalidTransition => 603,
            ErrorCode::ThumbnailRegression => 604,
            ErrorCode::JobFailed => 605,

            ErrorCode::DownloadFailed => 701,
            ErrorCode::ArtifactReleased => 702,
            ErrorCode::ExportFailed => 703,

            ErrorCode::CaptureFailed => 801,

            ErrorCode::InternalError => 901,
            ErrorCode::SerializationError => 902,
        }
    }

    /// Get the string code (e.g., "F101")
    pub fn as_str(&self) -> String {
        format!("F{}", self.code())
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "F{}", self.code())
    }
}

/// Main error type for all forge3d operations
#[derive(Error, Debug)]
pub enum ForgeError {
    // ==================== Admission Errors (F1XX) ====================
    /// Sliding-window rate limit reached
    #[error("[{code}] Rate limit exceeded: max {max_requests} requests per {} minutes, retry in {}s", .window.as_secs() / 60, .retry_after.as_secs())]
    RateLimited {
        code: ErrorCode,
        max_requests: usize,
        window: Duration,
        retry_after: Duration,
    },

    /// Concurrent job cap reached
    #[error("[{code}] Queue full: {active} of {max} jobs already running")]
    QueueFull {
        code: ErrorCode,
        active: usize,
        max: usize,
    },

    // ==================== Network Errors (F2XX) ====================
    /// HTTP/Network error
    #[error("[{code}] Network error: {message}")]
    Network {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// API error with status code
    #[error("[{code}] API error ({status}): {message}")]
    Api {
        code: ErrorCode,
        status: u16,
        message: String,
    },

    /// Backend discovery error
    #[error("[{code}] Backend discovery failed: {message}")]
    Discovery { code: ErrorCode, message: String },

    // ==================== File/IO Errors (F3XX) ====================
    /// File or IO error
    #[error("[{code}] {context}: {message}")]
    Io {
        code: ErrorCode,
        context: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // ==================== Configuration Errors (F4XX) ====================
    /// Configuration error
    #[error("[{code}] Configuration error: {message}")]
    Config {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<config::ConfigError>,
    },

    // ==================== Validation Errors (F5XX) ====================
    /// Validation error
    #[error("[{code}] Validation error: {message}")]
    Validation {
        code: ErrorCode,
        message: String,
        field: Option<String>,
    },

    /// Invalid input error
    #[error("[{code}] Invalid input: {message}")]
    InvalidInput { code: ErrorCode, message: String },

    // ==================== Job Errors (F6XX) ====================
    /// Job lifecycle violation
    #[error("[{code}] Job {job_id}: {message}")]
    Job {
        code: ErrorCode,
        job_id: String,
        message: String,
    },

    // ==================== Artifact Errors (F7XX) ====================
    /// Artifact error
    #[error("[{code}] Artifact error: {message}")]
    Artifact { code: ErrorCode, message: String },

    // ==================== Capture Errors (F8XX) ====================
    /// Thumbnail capture error
    #[error("[{code}] Capture failed: {message}")]
    Capture { code: ErrorCode, message: String },

    // ==================== Internal Errors (F9XX) ====================
    /// Internal/Unexpected error
    #[error("[{code}] Internal error: {message}")]
    Internal { code: ErrorCode, message: String },

    /// JSON serialization error
    #[error("[{code}] Serialization error: {message}")]
    Serialization {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Timeout error
    #[error("[F202] Operation timed out")]
    Timeout,
}

// ==================== Constructor Methods ====================

impl ForgeError {
    // --- Admission ---

    /// Create rate limited error
    pub fn rate_limited(max_requests: usize, window: Duration, retry_after: Duration) -> Self {
        Self::RateLimited {
            code: ErrorCode::RateLimited,
            max_requests,
            window,
            retry_after,
        }
    }

    /// Create queue full error
    pub fn queue_full(active: usize, max: usize) -> Self {
        Self::QueueFull {
            code: ErrorCode::QueueFull,
            active,
            max,
        }
    }

    // --- Network ---

    /// Create network error from message
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            code: ErrorCode::HttpError,
            message: message.into(),
            source: None,
        }
    }

    /// Create network error from reqwest error
    pub fn network_from_reqwest(err: reqwest::Error) -> Self {
        let code = if err.is_timeout() {
            ErrorCode::ConnectionTimeout
        } else if err.is_connect() {
            ErrorCode::ConnectionRefused
        } else {
            ErrorCode::HttpError
        };

        Self::Network {
            code,
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create API error
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            code: ErrorCode::ApiError,
            status,
            message: message.into(),
        }
    }

    /// Create invalid response error
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::Api {
            code: ErrorCode::InvalidResponse,
            status: 0,
            message: message.into(),
        }
    }

    /// Create discovery error
    pub fn discovery(message: impl Into<String>) -> Self {
        Self::Discovery {
            code: ErrorCode::DiscoveryFailed,
            message: message.into(),
        }
    }

    // --- File/IO ---

    /// Create IO error with context
    pub fn io(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            code: ErrorCode::FileReadError,
            context: context.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create IO error from std::io::Error
    pub fn io_from_error(context: impl Into<String>, err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            std::io::ErrorKind::PermissionDenied => ErrorCode::FileWriteError,
            std::io::ErrorKind::AlreadyExists => ErrorCode::FileAlreadyExists,
            _ => ErrorCode::FileReadError,
        };

        Self::Io {
            code,
            context: context.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create file already exists error
    pub fn file_exists(path: impl Into<String>) -> Self {
        Self::Io {
            code: ErrorCode::FileAlreadyExists,
            context: "File already exists".to_string(),
            message: path.into(),
            source: None,
        }
    }

    // --- Configuration ---

    /// Create configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::ConfigError,
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration error with source
    pub fn config_from_error(err: config::ConfigError) -> Self {
        Self::Config {
            code: ErrorCode::ConfigError,
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Create invalid endpoint error
    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::Config {
            code: ErrorCode::InvalidEndpoint,
            message: message.into(),
            source: None,
        }
    }

    // --- Validation ---

    /// Create validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            code: ErrorCode::ValidationFailed,
            message: message.into(),
            field: None,
        }
    }

    /// Create validation error with field
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            code: ErrorCode::ValidationFailed,
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create invalid input error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            code: ErrorCode::InvalidInput,
            message: message.into(),
        }
    }

    // --- Job lifecycle ---

    /// Create job not found error
    pub fn job_not_found(job_id: impl Into<String>) -> Self {
        Self::Job {
            code: ErrorCode::JobNotFound,
            job_id: job_id.into(),
            message: "not found in library".to_string(),
        }
    }

    /// Create duplicate job error
    pub fn duplicate_job(job_id: impl Into<String>) -> Self {
        Self::Job {
            code: ErrorCode::DuplicateJob,
            job_id: job_id.into(),
            message: "already present in library".to_string(),
        }
    }

    /// Create invalid transition error
    pub fn invalid_transition(
        job_id: impl Into<String>,
        from: impl fmt::Display,
        to: impl fmt::Display,
    ) -> Self {
        Self::Job {
            code: ErrorCode::InvalidTransition,
            job_id: job_id.into(),
            message: format!("cannot move from {} to {}", from, to),
        }
    }

    /// Create thumbnail regression error
    pub fn thumbnail_regression(job_id: impl Into<String>) -> Self {
        Self::Job {
            code: ErrorCode::ThumbnailRegression,
            job_id: job_id.into(),
            message: "captured thumbnail cannot be replaced by a placeholder".to_string(),
        }
    }

    /// Create job failed error carrying the reason stored on the record
    pub fn job_failed(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Job {
            code: ErrorCode::JobFailed,
            job_id: job_id.into(),
            message: reason.into(),
        }
    }

    // --- Artifact ---

    /// Create download error
    pub fn download(message: impl Into<String>) -> Self {
        Self::Artifact {
            code: ErrorCode::DownloadFailed,
            message: message.into(),
        }
    }

    /// Create released handle error
    pub fn artifact_released(url: impl Into<String>) -> Self {
        Self::Artifact {
            code: ErrorCode::ArtifactReleased,
            message: format!("handle {} is unknown or released", url.into()),
        }
    }

    /// Create export error
    pub fn export(message: impl Into<String>) -> Self {
        Self::Artifact {
            code: ErrorCode::ExportFailed,
            message: message.into(),
        }
    }

    // --- Capture ---

    /// Create capture error
    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            code: ErrorCode::CaptureFailed,
            message: message.into(),
        }
    }

    // --- Internal ---

    /// Create internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: ErrorCode::InternalError,
            message: message.into(),
        }
    }

    /// Create serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            code: ErrorCode::SerializationError,
            message: message.into(),
            source: None,
        }
    }

    // --- Utility Methods ---

    /// Get the error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RateLimited { code, .. } => *code,
            Self::QueueFull { code, .. } => *code,
            Self::Network { code, .. } => *code,
            Self::Api { code, .. } => *code,
            Self::Discovery { code, .. } => *code,
            Self::Io { code, .. } => *code,
            Self::Config { code, .. } => *code,
            Self::Validation { code, .. } => *code,
            Self::InvalidInput { code, .. } => *code,
            Self::Job { code, .. } => *code,
            Self::Artifact { code, .. } => *code,
            Self::Capture { code, .. } => *code,
            Self::Internal { code, .. } => *code,
            Self::Serialization { code, .. } => *code,
            Self::Timeout => ErrorCode::ConnectionTimeout,
        }
    }

    /// Check if this is a pre-flight admission rejection
    pub fn is_admission_error(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::QueueFull { .. })
    }

    /// Check if this is a network error
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Api { .. } | Self::Discovery { .. } | Self::Timeout
        )
    }

    /// Check if this is a retryable error; the poller fails a job at once on anything else
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. }
                | Self::Timeout
                | Self::Api { status: 408, .. }
                | Self::Api { status: 500, .. }
                | Self::Api { status: 502, .. }
                | Self::Api { status: 503, .. }
                | Self::Api { status: 504, .. }
                | Self::Api { status: 429, .. }
        )
    }

    /// Message without the code prefix, as shown on a failed job record
    pub fn user_message(&self) -> String {
        match self {
            Self::Network { message, .. }
            | Self::Api { message, .. }
            | Self::Discovery { message, .. }
            | Self::Artifact { message, .. }
            | Self::Capture { message, .. }
            | Self::Internal { message, .. }
            | Self::Serialization { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

// ==================== From Implementations ====================

impl From<std::io::Error> for ForgeError {
    fn from(err: std::io::Error) -> Self {
        Self::io_from_error("IO operation", err)
    }
}

impl From<reqwest::Error> for ForgeError {
    fn from(err: reqwest::Error) -> Self {
        Self::network_from_reqwest(err)
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            code: ErrorCode::SerializationError,
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<config::ConfigError> for ForgeError {
    fn from(err: config::ConfigError) -> Self {
        Self::config_from_error(err)
    }
}

impl From<validator::ValidationErrors> for ForgeError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|k| k.to_string());
        Self::Validation {
            code: ErrorCode::ValidationFailed,
            message: err.to_string(),
            field,
        }
    }
}

impl From<dialoguer::Error> for ForgeError {
    fn from(err: dialoguer::Error) -> Self {
        Self::Internal {
            code: ErrorCode::InternalError,
            message: format!("Dialog error: {}", err),
        }
    }
}

// Manual Clone implementation that drops non-cloneable sources
impl Clone for ForgeError {
    fn clone(&self) -> Self {
        match self {
            Self::RateLimited {
                code,
                max_requests,
                window,
                retry_after,
            } => Self::RateLimited {
                code: *code,
                max_requests: *max_requests,
                window: *window,
                retry_after: *retry_after,
            },
            Self::QueueFull { code, active, max } => Self::QueueFull {
                code: *code,
                active: *active,
                max: *max,
            },
            Self::Network {
                code,
                message,
                source: _,
            } => Self::Network {
                code: *code,
                message: message.clone(),
                source: None,
            },
            Self::Api {
                code,
                status,
                message,
            } => Self::Api {
                code: *code,
                status: *status,
                message: message.clone(),
            },
            Self::Discovery { code, message } => Self::Discovery {
                code: *code,
                message: message.clone(),
            },
            Self::Io {
                code,
                context,
                message,
                source: _,
            } => Self::Io {
                code: *code,
                context: context.clone(),
                message: message.clone(),
                source: None,
            },
            Self::Config {
                code,
                message,
                source: _,
            } => Self::Config {
                code: *code,
                message: message.clone(),
                source: None,
            },
            Self::Validation {
                code,
                message,
                field,
            } => Self::Validation {
                code: *code,
                message: message.clone(),
                field: field.clone(),
            },
            Self::InvalidInput { code, message } => Self::InvalidInput {
                code: *code,
                message: message.clone(),
            },
            Self::Job {
                code,
                job_id,
                message,
            } => Self::Job {
                code: *code,
                job_id: job_id.clone(),
                message: message.clone(),
            },
            Self::Artifact { code, message } => Self::Artifact {
                code: *code,
                message: message.clone(),
            },
            Self::Capture { code, message } => Self::Capture {
                code: *code,
                message: message.clone(),
            },
            Self::Internal { code, message } => Self::Internal {
                code: *code,
                message: message.clone(),
            },
            Self::Serialization {
                code,
                message,
                source: _,
            } => Self::Serialization {
                code: *code,
                message: message.clone(),
                source: None,
            },
            Self::Timeout => Self::Timeout,
        }
    }
}
