//! Remediator
//!
//! Applies the declarative "block all public access" write and re-reads the
//! bucket to confirm it took effect. The write sets every flag to `true`
//! rather than flipping the disabled ones, so applying it to an already
//! blocked bucket changes nothing.

use std::sync::Arc;

use tracing::{info, warn};

use super::types::{ActionTaken, ErrorDetail, PublicAccessState, RemediationOutcome, Verdict};
use crate::error::{ApiError, RemediationError, Result};
use crate::providers::AccessConfigApi;
use crate::retry::RetryPolicy;

pub struct Remediator {
    api: Arc<dyn AccessConfigApi>,
    retry: RetryPolicy,
}

/// Why a single write+confirm round did not succeed
enum RoundFailure {
    Api(ApiError),
    /// Write acknowledged but the re-read still shows exposure
    Unconfirmed(PublicAccessState),
}

impl Remediator {
    pub fn new(api: Arc<dyn AccessConfigApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// Block all public access on the bucket named by `verdict`.
    ///
    /// Write or confirmation failures yield a `RemediationFailed` outcome.
    /// Only a vanished bucket is returned as an error (`ResourceNotFound`).
    pub async fn remediate(&self, verdict: &Verdict) -> Result<RemediationOutcome> {
        let bucket = verdict.state_before.resource_id.as_str();
        let mut attempt = 1;

        loop {
            let failure = match self.round(bucket).await {
                Ok(state_after) => {
                    info!(bucket = %bucket, attempt, "Public access blocked and confirmed");
                    return Ok(RemediationOutcome {
                        resource_id: bucket.to_string(),
                        action_taken: ActionTaken::BlockedAllPublicAccess,
                        state_after: Some(state_after),
                        error: None,
                    });
                }
                Err(RoundFailure::Api(ApiError::NotFound(resource))) => {
                    return Err(RemediationError::ResourceNotFound(resource));
                }
                Err(failure) => failure,
            };

            let retryable = match &failure {
                RoundFailure::Api(e) => e.is_retryable(),
                RoundFailure::Unconfirmed(_) => true,
            };

            if !retryable || attempt >= self.retry.max_attempts {
                return Ok(Self::failed(bucket, failure, attempt));
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                bucket = %bucket,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Remediation not confirmed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// One write followed by one confirmation read
    async fn round(&self, bucket: &str) -> std::result::Result<PublicAccessState, RoundFailure> {
        self.api
            .block_all_public_access(bucket)
            .await
            .map_err(RoundFailure::Api)?;

        let state = self
            .api
            .get_public_access(bucket)
            .await
            .map_err(RoundFailure::Api)?;

        if state.is_fully_blocked() {
            Ok(state)
        } else {
            Err(RoundFailure::Unconfirmed(state))
        }
    }

    fn failed(bucket: &str, failure: RoundFailure, attempts: u32) -> RemediationOutcome {
        let (state_after, error) = match failure {
            RoundFailure::Unconfirmed(state) => {
                let message = format!(
                    "write acknowledged but bucket still reports {:?}",
                    state.flags()
                );
                (
                    Some(state),
                    ErrorDetail {
                        kind: "unconfirmed".to_string(),
                        message,
                        attempts,
                    },
                )
            }
            RoundFailure::Api(e) => {
                let kind = if e.is_retryable() { "transient_api" } else { "api" };
                (
                    None,
                    ErrorDetail {
                        kind: kind.to_string(),
                        message: e.to_string(),
                        attempts,
                    },
                )
            }
        };

        warn!(
            bucket = %bucket,
            attempts,
            kind = %error.kind,
            error = %error.message,
            "Remediation failed"
        );

        RemediationOutcome {
            resource_id: bucket.to_string(),
            action_taken: ActionTaken::RemediationFailed,
            state_after,
            error: Some(error),
        }
    }
}
