//! Control Plane Providers
//!
//! Traits for the external collaborators the agent calls into, plus their
//! AWS implementations:
//! - [`AccessConfigApi`]: read/write a bucket's public access block (S3)
//! - [`NotificationChannel`]: publish alerts to a topic (SNS)
//!
//! The guard store lives in [`crate::agent::guard`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::types::PublicAccessState;
use crate::error::ApiError;

pub mod dynamodb;
pub mod s3;
pub mod sns;

pub use dynamodb::DynamoGuard;
pub use s3::S3AccessConfigApi;
pub use sns::SnsChannel;

/// Storage provider control plane for public access settings.
#[async_trait]
pub trait AccessConfigApi: Send + Sync {
    /// Read the live configuration. A bucket without any configuration
    /// is reported as all four settings disabled.
    async fn get_public_access(&self, bucket: &str) -> Result<PublicAccessState, ApiError>;

    /// Declaratively set all four settings to `true`.
    async fn block_all_public_access(&self, bucket: &str) -> Result<(), ApiError>;
}

/// A structured message sent to the notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub subject: String,
    pub body: serde_json::Value,
}

/// Outbound notification channel (topic fan-out).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Publish and return the channel's message ID.
    async fn publish(&self, topic: &str, alert: &Alert) -> Result<String, ApiError>;
}

/// Error codes that mean "try again later"
const TRANSIENT_CODES: &[&str] = &[
    "SlowDown",
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "RequestTimeout",
    "RequestTimeoutException",
    "InternalError",
    "InternalFailure",
    "ServiceUnavailable",
    "ProvisionedThroughputExceededException",
];

/// Error codes that mean the resource does not exist
const NOT_FOUND_CODES: &[&str] = &[
    "NoSuchBucket",
    "NotFound",
    "NotFoundException",
    "ResourceNotFoundException",
];

/// Map an AWS error to the adapter taxonomy.
///
/// `connection_failure` covers timeouts and dispatch failures where no
/// response was received.
pub(crate) fn classify_aws_error(
    resource: &str,
    code: Option<&str>,
    status: Option<u16>,
    connection_failure: bool,
    message: String,
) -> ApiError {
    if let Some(code) = code {
        if NOT_FOUND_CODES.contains(&code) {
            return ApiError::NotFound(resource.to_string());
        }
        if TRANSIENT_CODES.contains(&code) {
            return ApiError::Transient(message);
        }
    }

    match status {
        Some(404) => ApiError::NotFound(resource.to_string()),
        Some(429) => ApiError::Transient(message),
        Some(s) if s >= 500 => ApiError::Transient(message),
        _ if connection_failure => ApiError::Transient(message),
        // Response could not be parsed, no status: treat like a dropped connection
        None => ApiError::Transient(message),
        _ => ApiError::Rejected(message),
    }
}
