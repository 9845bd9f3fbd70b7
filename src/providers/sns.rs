//! SNS Notification Channel
//!
//! Publishes alerts to an SNS topic. The alert body is sent as pretty JSON
//! so email subscribers get a readable message and programmatic subscribers
//! can parse it.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sns as sns;
use aws_sdk_sns::config::http::HttpResponse;
use aws_sdk_sns::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};

use super::{classify_aws_error, Alert, NotificationChannel};
use crate::error::ApiError;

pub struct SnsChannel {
    client: sns::Client,
}

impl SnsChannel {
    pub fn new(client: sns::Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let conf = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(sns::Client::new(&conf))
    }
}

#[async_trait]
impl NotificationChannel for SnsChannel {
    async fn publish(&self, topic: &str, alert: &Alert) -> Result<String, ApiError> {
        let message = serde_json::to_string_pretty(&alert.body)
            .map_err(|e| ApiError::Rejected(format!("unserializable alert: {}", e)))?;

        let resp = self
            .client
            .publish()
            .topic_arn(topic)
            .subject(&alert.subject)
            .message(message)
            .send()
            .await
            .map_err(|err| api_error(topic, err))?;

        Ok(resp.message_id().unwrap_or("unknown").to_string())
    }
}

fn api_error<E>(topic: &str, err: SdkError<E, HttpResponse>) -> ApiError
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
        topic,
        code.as_deref(),
        status,
        connection_failure,
        DisplayErrorContext(&err).to_string(),
    )
}
