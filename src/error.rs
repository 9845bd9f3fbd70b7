//! Error types for Bucket Guard.

use thiserror::Error;

/// Errors returned by the external control plane adapters
/// (storage API, notification channel).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    /// The bucket does not exist (deleted, or never visible)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Network failure, throttling, 5xx. Safe to retry.
    #[error("Transient API error: {0}")]
    Transient(String),

    /// Access denied, validation failure, rejected message. Not retried.
    #[error("API request rejected: {0}")]
    Rejected(String),
}

impl ApiError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

/// Errors surfaced by the guard store.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Guard store unavailable: {0}")]
    Unavailable(String),
}

/// Invocation-level error taxonomy.
#[derive(Debug, Error)]
pub enum RemediationError {
    /// Payload could not be turned into a change event. Never retried.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Bucket vanished before inspection
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Retries exhausted on a transient failure
    #[error("Transient API error during {operation} after {attempts} attempts: {message}")]
    TransientApi {
        operation: String,
        attempts: u32,
        message: String,
    },

    /// Non-retryable control plane failure
    #[error("API error during {operation}: {message}")]
    Api { operation: String, message: String },

    /// The channel rejected the alert
    #[error("Notification delivery failed: {0}")]
    NotificationDelivery(String),

    /// End-to-end invocation deadline exceeded
    #[error("Invocation timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Guard(#[from] GuardError),
}

impl RemediationError {
    /// Convert an adapter error raised while performing `operation`.
    pub fn from_api(operation: &str, attempts: u32, err: ApiError) -> Self {
        match err {
            ApiError::NotFound(resource) => RemediationError::ResourceNotFound(resource),
            ApiError::Transient(message) => RemediationError::TransientApi {
                operation: operation.to_string(),
                attempts,
                message,
            },
            ApiError::Rejected(message) => RemediationError::Api {
                operation: operation.to_string(),
                message,
            },
        }
    }

    /// Short machine-readable name, used in logs and alerts
    pub fn kind(&self) -> &'static str {
        match self {
            RemediationError::MalformedEvent(_) => "malformed_event",
            RemediationError::ResourceNotFound(_) => "resource_not_found",
            RemediationError::TransientApi { .. } => "transient_api",
            RemediationError::Api { .. } => "api",
            RemediationError::NotificationDelivery(_) => "notification_delivery",
            RemediationError::Timeout(_) => "timeout",
            RemediationError::Guard(_) => "guard",
        }
    }

    /// Whether an operator error alert should go out for this failure.
    ///
    /// Malformed input is only logged, and a failed alert cannot be
    /// reported through the same channel.
    pub fn warrants_error_alert(&self) -> bool {
        !matches!(
            self,
            RemediationError::MalformedEvent(_)
                | RemediationError::ResourceNotFound(_)
                | RemediationError::NotificationDelivery(_)
        )
    }
}

/// Result type for Bucket Guard operations.
pub type Result<T, E = RemediationError> = std::result::Result<T, E>;
