//! State Inspector
//!
//! Reads the live public access configuration of a bucket. Events may be
//! delayed, duplicated or reordered, so the storage API is the only source
//! of truth and nothing is cached between invocations.

use std::sync::Arc;

use tracing::debug;

use super::types::PublicAccessState;
use crate::error::{RemediationError, Result};
use crate::providers::AccessConfigApi;
use crate::retry::RetryPolicy;

pub struct StateInspector {
    api: Arc<dyn AccessConfigApi>,
    retry: RetryPolicy,
}

impl StateInspector {
    pub fn new(api: Arc<dyn AccessConfigApi>, retry: RetryPolicy) -> Self {
        Self { api, retry }
    }

    /// Fetch the current state, retrying transient failures.
    ///
    /// Fails with `ResourceNotFound` when the bucket no longer exists.
    pub async fn inspect(&self, resource_id: &str) -> Result<PublicAccessState> {
        let state = self
            .retry
            .run("get_public_access", |attempt| {
                debug!(bucket = %resource_id, attempt, "Reading public access block");
                self.api.get_public_access(resource_id)
            })
            .await
            .map_err(|e| RemediationError::from_api("get_public_access", e.attempts, e.error))?;

        Ok(state)
    }
}
