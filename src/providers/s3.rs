//! S3 Public Access Block Adapter
//!
//! Reads and writes the bucket-level `PublicAccessBlockConfiguration`
//! through the S3 control plane using the default AWS credential chain.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3 as s3;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::PublicAccessBlockConfiguration;
use chrono::Utc;
use tracing::debug;

use super::{classify_aws_error, AccessConfigApi};
use crate::agent::types::PublicAccessState;
use crate::error::ApiError;

/// Returned when a bucket has never had a public access block configured
const NO_CONFIGURATION_CODE: &str = "NoSuchPublicAccessBlockConfiguration";

pub struct S3AccessConfigApi {
    client: s3::Client,
}

impl S3AccessConfigApi {
    pub fn new(client: s3::Client) -> Self {
        Self { client }
    }

    /// Build a client from the environment (region, credentials, profile).
    pub async fn from_env() -> Self {
        let conf = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(s3::Client::new(&conf))
    }
}

#[async_trait]
impl AccessConfigApi for S3AccessConfigApi {
    async fn get_public_access(&self, bucket: &str) -> Result<PublicAccessState, ApiError> {
        match self.client.get_public_access_block().bucket(bucket).send().await {
            Ok(resp) => {
                let Some(cfg) = resp.public_access_block_configuration() else {
                    return Ok(PublicAccessState::unprotected(bucket));
                };

                // Unset flags behave as disabled
                Ok(PublicAccessState {
                    resource_id: bucket.to_string(),
                    block_public_acls: cfg.block_public_acls().unwrap_or(false),
                    ignore_public_acls: cfg.ignore_public_acls().unwrap_or(false),
                    block_public_policy: cfg.block_public_policy().unwrap_or(false),
                    restrict_public_buckets: cfg.restrict_public_buckets().unwrap_or(false),
                    observed_at: Utc::now(),
                })
            }
            Err(err) if err.code() == Some(NO_CONFIGURATION_CODE) => {
                debug!(bucket = %bucket, "No public access block configured");
                Ok(PublicAccessState::unprotected(bucket))
            }
            Err(err) => Err(api_error(bucket, err)),
        }
    }

    async fn block_all_public_access(&self, bucket: &str) -> Result<(), ApiError> {
        let config = PublicAccessBlockConfiguration::builder()
            .block_public_acls(true)
            .ignore_public_acls(true)
            .block_public_policy(true)
            .restrict_public_buckets(true)
            .build();

        self.client
            .put_public_access_block()
            .bucket(bucket)
            .public_access_block_configuration(config)
            .send()
            .await
            .map_err(|err| api_error(bucket, err))?;

        debug!(bucket = %bucket, "PutPublicAccessBlock acknowledged");
        Ok(())
    }
}

fn api_error<E>(bucket: &str, err: SdkError<E, HttpResponse>) -> ApiError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let connection_failure = matches!(
        err,
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_)
    );
    let code = err.code().map(str::to_string);

    classify_aws_error(
        bucket,
        code.as_deref(),
        status,
        connection_failure,
        DisplayErrorContext(&err).to_string(),
    )
}
