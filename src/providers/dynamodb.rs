//! DynamoDB Idempotency Guard
//!
//! Shared guard for deployments where invocations do not share memory.
//! One item per bucket; acquisition is a conditional update that only
//! succeeds when no live lease or settled window exists. Updating in place
//! keeps a `pending_alert` left by a run whose notification failed, and the
//! old item comes back with the response so the new lease can carry it.
//! Items carry an `expires_at` TTL attribute so the table cleans itself up.
//!
//! Table layout: partition key `resource_id` (S), TTL attribute `expires_at`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb as dynamodb;
use aws_sdk_dynamodb::config::http::HttpResponse;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_dynamodb::types::{AttributeValue, ReturnValue};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::agent::guard::{
    Completion, DedupeKey, GuardDecision, GuardSettings, IdempotencyGuard, Lease,
};
use crate::error::GuardError;
use crate::providers::Alert;

const CONDITION_FAILED: &str = "ConditionalCheckFailedException";

const ACQUIRE_CONDITION: &str =
    "attribute_not_exists(resource_id) OR (processing_until < :now AND settled_until < :now)";

const ACQUIRE_UPDATE: &str = "SET lease_token = :token, window_start = :window_start, \
     processing_until = :processing_until, settled_until = :settled_until, \
     expires_at = :expires_at";

const PENDING_ATTR: &str = "pending_alert";

/// How long an item (and any undelivered alert on it) outlives its last write
const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

pub struct DynamoGuard {
    client: dynamodb::Client,
    table: String,
    settings: GuardSettings,
}

impl DynamoGuard {
    pub fn new(client: dynamodb::Client, table: impl Into<String>, settings: GuardSettings) -> Self {
        Self {
            client,
            table: table.into(),
            settings,
        }
    }

    pub async fn from_env(table: impl Into<String>, settings: GuardSettings) -> Self {
        let conf = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Self::new(dynamodb::Client::new(&conf), table, settings)
    }
}

fn n(value: i64) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

fn expires_at(now_ms: i64) -> i64 {
    (now_ms + RETENTION.as_millis() as i64) / 1000
}

/// Expression values for acquiring a lease at `now_ms`
fn lease_values(
    key: &DedupeKey,
    token: &Uuid,
    now_ms: i64,
    settings: &GuardSettings,
) -> HashMap<String, AttributeValue> {
    let processing_until = now_ms + settings.processing_timeout.as_millis() as i64;
    let settled_until = now_ms + settings.dedupe_window.as_millis() as i64;

    HashMap::from([
        (":now".to_string(), n(now_ms)),
        (":token".to_string(), AttributeValue::S(token.to_string())),
        (":window_start".to_string(), n(key.window_start)),
        (":processing_until".to_string(), n(processing_until)),
        (":settled_until".to_string(), n(settled_until)),
        (":expires_at".to_string(), n(expires_at(now_ms))),
    ])
}

/// Undelivered alert stored on the previous item, if any
fn pending_alert(old: Option<&HashMap<String, AttributeValue>>) -> Option<Alert> {
    let raw = old?.get(PENDING_ATTR)?.as_s().ok()?;
    match serde_json::from_str(raw) {
        Ok(alert) => Some(alert),
        Err(e) => {
            warn!(error = %e, "Discarding unreadable pending alert");
            None
        }
    }
}

fn unavailable<E>(err: E) -> GuardError
where
    E: std::error::Error,
{
    GuardError::Unavailable(DisplayErrorContext(&err).to_string())
}

#[async_trait]
impl IdempotencyGuard for DynamoGuard {
    async fn try_acquire(&self, key: &DedupeKey) -> Result<GuardDecision, GuardError> {
        let now_ms = Utc::now().timestamp_millis();
        let token = Uuid::new_v4();

        let result = self
            .client
            .update_item()
            .table_name(&self.table)
            .key("resource_id", AttributeValue::S(key.resource_id.clone()))
            .update_expression(ACQUIRE_UPDATE)
            .condition_expression(ACQUIRE_CONDITION)
            .set_expression_attribute_values(Some(lease_values(
                key,
                &token,
                now_ms,
                &self.settings,
            )))
            .return_values(ReturnValue::AllOld)
            .send()
            .await;

        match result {
            Ok(output) => Ok(GuardDecision::Acquired(Lease {
                key: key.clone(),
                token,
                pending: pending_alert(output.attributes()),
            })),
            Err(err) if err.code() == Some(CONDITION_FAILED) => {
                debug!(key = %key, "Guard item held by another invocation");
                Ok(GuardDecision::Suppressed)
            }
            Err(err) => Err(unavailable(err)),
        }
    }

    async fn release(&self, lease: &Lease, completion: Completion) -> Result<(), GuardError> {
        let key = AttributeValue::S(lease.key.resource_id.clone());
        let token = AttributeValue::S(lease.token.to_string());

        match completion {
            Completion::Reported => {
                let result = self
                    .client
                    .update_item()
                    .table_name(&self.table)
                    .key("resource_id", key)
                    .update_expression("SET processing_until = :zero REMOVE pending_alert")
                    .condition_expression("lease_token = :token")
                    .expression_attribute_values(":zero", n(0))
                    .expression_attribute_values(":token", token)
                    .send()
                    .await;
                released(lease, result)
            }
            Completion::Failed => {
                let result = self
                    .client
                    .delete_item()
                    .table_name(&self.table)
                    .key("resource_id", key)
                    .condition_expression("lease_token = :token")
                    .expression_attribute_values(":token", token)
                    .send()
                    .await;
                released(lease, result)
            }
            Completion::PendingNotification(alert) => {
                let body = serde_json::to_string(&alert)
                    .map_err(|e| GuardError::Unavailable(format!("unserializable alert: {}", e)))?;

                let result = self
                    .client
                    .update_item()
                    .table_name(&self.table)
                    .key("resource_id", key)
                    .update_expression(
                        "SET processing_until = :zero, settled_until = :zero, \
                         pending_alert = :alert, expires_at = :expires_at",
                    )
                    .condition_expression("lease_token = :token")
                    .expression_attribute_values(":zero", n(0))
                    .expression_attribute_values(":alert", AttributeValue::S(body))
                    .expression_attribute_values(
                        ":expires_at",
                        n(expires_at(Utc::now().timestamp_millis())),
                    )
                    .expression_attribute_values(":token", token)
                    .send()
                    .await;
                released(lease, result)
            }
        }
    }
}

/// A failed token condition means the lease went stale and another run owns the item.
fn released<T, E>(lease: &Lease, result: Result<T, SdkError<E, HttpResponse>>) -> Result<(), GuardError>
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match result {
        Ok(_) => Ok(()),
        Err(err) if err.code() == Some(CONDITION_FAILED) => {
            debug!(key = %lease.key, "Ignoring release of stale lease");
            Ok(())
        }
        Err(err) => Err(unavailable(err)),
    }
}
