//! Event Normalizer
//!
//! Turns an EventBridge envelope carrying a CloudTrail S3 API call into a
//! [`ResourceChangeEvent`]. Only the bucket name and event metadata are
//! extracted; public access fields present in the payload are ignored, the
//! live state is always read from the storage API instead.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::types::{ChangeEventType, ResourceChangeEvent};
use crate::error::{RemediationError, Result};

/// CloudTrail event names that change who can reach a bucket
const ACCESS_CONFIG_EVENTS: &[&str] = &[
    "PutBucketPublicAccessBlock",
    "DeleteBucketPublicAccessBlock",
    "PutBucketAcl",
    "PutBucketPolicy",
    "DeleteBucketPolicy",
    "PutAccountPublicAccessBlock",
];

/// Parse raw bytes into a change event.
pub fn normalize_bytes(raw: &[u8]) -> Result<ResourceChangeEvent> {
    let payload: Value = serde_json::from_slice(raw)
        .map_err(|e| RemediationError::MalformedEvent(format!("invalid JSON: {}", e)))?;
    normalize(&payload)
}

/// Extract a change event from an already-parsed payload.
pub fn normalize(payload: &Value) -> Result<ResourceChangeEvent> {
    if !payload.is_object() {
        return Err(RemediationError::MalformedEvent(
            "payload is not a JSON object".to_string(),
        ));
    }

    let detail = &payload["detail"];
    let resource_id = bucket_name(detail).ok_or_else(|| {
        RemediationError::MalformedEvent("no bucket name in event detail".to_string())
    })?;

    let event_name = detail["eventName"].as_str().unwrap_or_default().to_string();

    let actor = non_empty(&detail["userIdentity"]["arn"])
        .or_else(|| non_empty(&detail["userIdentity"]["principalId"]))
        .unwrap_or("unknown")
        .to_string();

    let occurred_at = parse_time(&detail["eventTime"])
        .or_else(|| parse_time(&payload["time"]))
        .unwrap_or_else(Utc::now);

    let source_event_id = non_empty(&detail["eventID"])
        .or_else(|| non_empty(&payload["id"]))
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    Ok(ResourceChangeEvent {
        resource_id,
        event_type: classify(&event_name),
        event_name,
        actor,
        occurred_at,
        source_event_id,
        account: non_empty(&payload["account"]).map(str::to_string),
        region: non_empty(&payload["region"])
            .or_else(|| non_empty(&detail["awsRegion"]))
            .map(str::to_string),
    })
}

/// Map a CloudTrail event name to the change kind
pub fn classify(event_name: &str) -> ChangeEventType {
    if event_name == "CreateBucket" {
        ChangeEventType::Created
    } else if ACCESS_CONFIG_EVENTS.contains(&event_name) {
        ChangeEventType::AccessConfigChanged
    } else {
        ChangeEventType::Unknown
    }
}

fn bucket_name(detail: &Value) -> Option<String> {
    non_empty(&detail["requestParameters"]["bucketName"])
        .or_else(|| non_empty(&detail["responseElements"]["bucketName"]))
        .map(str::to_string)
}

fn non_empty(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}
