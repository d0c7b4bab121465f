//! Error types for the field-operations core
//!
//! Errors are classified by recoverability:
//! - Retryable: the remote store is unreachable (`Offline`), position reads timing out
//! - Terminal: the remote refused a write, or a write ran out of retries
//! - Precondition: unknown site ids, out-of-range route indices

use thiserror::Error;

/// Error types raised by the core components
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FieldOpsError {
    // Retryable errors
    #[error("Remote store unreachable: {0}")]
    Offline(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    // Terminal write errors
    #[error("Remote store rejected the write: {0}")]
    Rejected(String),

    #[error("Write for site {site_id} failed after {attempts} attempts")]
    RetriesExhausted { site_id: String, attempts: u32 },

    // Local precondition violations
    #[error("Index {index} out of range for route with {len} stops")]
    OutOfRange { index: usize, len: usize },

    #[error("Unknown site: {0}")]
    NotFound(String),

    // Geolocation collaborator errors
    #[error("Location permission denied")]
    PositionDenied,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    // Local infrastructure
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid document {id}: {reason}")]
    InvalidDocument { id: String, reason: String },
}

impl FieldOpsError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FieldOpsError::Offline(_)
                | FieldOpsError::Timeout(_)
                | FieldOpsError::PositionUnavailable(_)
        )
    }

    /// Returns true if a local edit tied to this error will never reach the remote store
    pub fn is_unsaved_change(&self) -> bool {
        matches!(
            self,
            FieldOpsError::Rejected(_) | FieldOpsError::RetriesExhausted { .. }
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            FieldOpsError::Offline(_) => "You are offline. Changes will sync when reconnected.",
            FieldOpsError::Timeout(_) => "The request took too long. Try again.",
            FieldOpsError::Rejected(_) => {
                "This change was not saved. Check your permissions and apply it again."
            }
            FieldOpsError::RetriesExhausted { .. } => {
                "This change was not saved. Retry it from the pending changes list."
            }
            FieldOpsError::OutOfRange { .. } => "Pick a stop that exists in the route.",
            FieldOpsError::NotFound(_) => "Reload the site list and try again.",
            FieldOpsError::PositionDenied => "Allow location access in the device settings.",
            FieldOpsError::PositionUnavailable(_) => {
                "No GPS fix yet. Move to open sky and try again."
            }
            FieldOpsError::Persistence(_) => "Check disk space and file permissions.",
            FieldOpsError::Config(_) => "Check your configuration in ~/.fieldops/config.json",
            FieldOpsError::InvalidDocument { .. } => {
                "The remote record is malformed. Fix it in the remote collection."
            }
        }
    }
}

impl From<crate::db::DbError> for FieldOpsError {
    fn from(err: crate::db::DbError) -> Self {
        FieldOpsError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for FieldOpsError {
    fn from(err: serde_json::Error) -> Self {
        FieldOpsError::Persistence(format!("JSON error: {}", err))
    }
}

/// Serializable error representation for the UI event feed
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorPayload {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    /// "Will sync when reconnected"
    Transient,
    /// "This change was not saved"
    Unsaved,
    Other,
}

impl SyncErrorPayload {
    pub fn for_site(err: &FieldOpsError, site_id: Option<&str>) -> Self {
        let mut payload = SyncErrorPayload::from(err);
        payload.site_id = site_id.map(|s| s.to_string());
        payload
    }
}

impl From<&FieldOpsError> for SyncErrorPayload {
    fn from(err: &FieldOpsError) -> Self {
        let error_type = if err.is_unsaved_change() {
            ErrorType::Unsaved
        } else if err.is_retryable() {
            ErrorType::Transient
        } else {
            ErrorType::Other
        };

        SyncErrorPayload {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
            site_id: None,
        }
    }
}
