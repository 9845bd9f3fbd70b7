//! Notifier
//!
//! Builds one alert per remediation attempt and publishes it. Buckets that
//! were already compliant produce no message. A rejected publish is surfaced
//! as `NotificationDelivery` so the caller can retry the invocation.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use super::types::{ActionTaken, RemediationOutcome, ResourceChangeEvent, Verdict};
use crate::error::{RemediationError, Result};
use crate::providers::{Alert, NotificationChannel};

/// SNS rejects subjects longer than this
const MAX_SUBJECT_LEN: usize = 100;

pub struct Notifier {
    channel: Arc<dyn NotificationChannel>,
    topic: String,
}

impl Notifier {
    pub fn new(channel: Arc<dyn NotificationChannel>, topic: impl Into<String>) -> Self {
        Self {
            channel,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Tell operators that the agent itself failed on an event.
    pub async fn notify_error(
        &self,
        event: &ResourceChangeEvent,
        err: &RemediationError,
    ) -> Result<String> {
        self.deliver(&error_alert(event, err)).await
    }

    /// Publish an alert and return the channel message ID.
    pub async fn deliver(&self, alert: &Alert) -> Result<String> {
        let message_id = self.channel.publish(&self.topic, alert).await.map_err(|e| {
            error!(topic = %self.topic, subject = %alert.subject, error = %e, "Alert delivery failed");
            RemediationError::NotificationDelivery(e.to_string())
        })?;

        info!(subject = %alert.subject, message_id = %message_id, "Alert delivered");
        Ok(message_id)
    }
}

/// Build the alert for an outcome; `None` for `ActionTaken::None`.
pub fn outcome_alert(
    event: &ResourceChangeEvent,
    verdict: &Verdict,
    outcome: &RemediationOutcome,
) -> Option<Alert> {
    let (alert_type, severity, subject) = match outcome.action_taken {
        ActionTaken::None => return None,
        ActionTaken::BlockedAllPublicAccess => (
            "public_bucket_remediated",
            "HIGH",
            format!("Bucket Guard: public bucket {} secured", outcome.resource_id),
        ),
        ActionTaken::RemediationFailed => (
            "public_bucket_remediation_failed",
            "CRITICAL",
            format!(
                "Bucket Guard: FAILED to secure public bucket {}",
                outcome.resource_id
            ),
        ),
    };

    Some(Alert {
        subject: truncate_subject(&subject),
        body: json!({
            "alert_type": alert_type,
            "severity": severity,
            "resource_id": outcome.resource_id,
            "violation_reason": verdict.reason,
            "action_taken": outcome.action_taken,
            "state_before": verdict.state_before,
            "state_after": outcome.state_after,
            "error": outcome.error,
            "actor": event.actor,
            "event_name": event.event_name,
            "source_event_id": event.source_event_id,
            "account": event.account,
            "region": event.region,
            "occurred_at": event.occurred_at,
            "reported_at": Utc::now(),
        }),
    })
}

pub fn error_alert(event: &ResourceChangeEvent, err: &RemediationError) -> Alert {
    Alert {
        subject: truncate_subject(&format!(
            "Bucket Guard: error processing bucket {}",
            event.resource_id
        )),
        body: json!({
            "alert_type": "agent_error",
            "severity": "HIGH",
            "resource_id": event.resource_id,
            "error_kind": err.kind(),
            "error": err.to_string(),
            "actor": event.actor,
            "event_name": event.event_name,
            "source_event_id": event.source_event_id,
            "occurred_at": event.occurred_at,
            "reported_at": Utc::now(),
            "action_required": "manual investigation",
        }),
    }
}

fn truncate_subject(subject: &str) -> String {
    if subject.chars().count() <= MAX_SUBJECT_LEN {
        return subject.to_string();
    }
    let mut out: String = subject.chars().take(MAX_SUBJECT_LEN - 3).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::evaluator::evaluate;
    use crate::agent::types::{ChangeEventType, ErrorDetail, PublicAccessState};
    use crate::error::ApiError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingChannel {
        sent: Mutex<Vec<(String, Alert)>>,
        reject: bool,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        async fn publish(&self, topic: &str, alert: &Alert) -> std::result::Result<String, ApiError> {
            if self.reject {
                return Err(ApiError::Rejected("topic does not exist".into()));
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((topic.to_string(), alert.clone()));
            Ok(format!("msg-{}", sent.len()))
        }
    }

    fn channel(reject: bool) -> Arc<RecordingChannel> {
        Arc::new(RecordingChannel {
            sent: Mutex::new(Vec::new()),
            reject,
        })
    }

    fn event() -> ResourceChangeEvent {
        ResourceChangeEvent {
            resource_id: "bucket-x".into(),
            event_type: ChangeEventType::Created,
            event_name: "CreateBucket".into(),
            actor: "arn:aws:iam::1:user/dev".into(),
            occurred_at: Utc::now(),
            source_event_id: "ct-1".into(),
            account: None,
            region: None,
        }
    }

    fn blocked_outcome() -> RemediationOutcome {
        RemediationOutcome {
            resource_id: "bucket-x".into(),
            action_taken: ActionTaken::BlockedAllPublicAccess,
            state_after: Some(PublicAccessState::from_flags("bucket-x", [true; 4])),
            error: None,
        }
    }

    #[test]
    fn test_no_action_has_no_alert() {
        let verdict = evaluate(&PublicAccessState::from_flags("bucket-x", [true; 4]));
        let alert = outcome_alert(&event(), &verdict, &RemediationOutcome::no_action("bucket-x"));
        assert!(alert.is_none());
    }

    #[tokio::test]
    async fn test_remediated_alert_content() {
        let ch = channel(false);
        let notifier = Notifier::new(ch.clone(), "arn:aws:sns:us-east-1:1:alerts");
        let verdict = evaluate(&PublicAccessState::unprotected("bucket-x"));

        let alert = outcome_alert(&event(), &verdict, &blocked_outcome()).unwrap();
        let id = notifier.deliver(&alert).await.unwrap();
        assert_eq!(id, "msg-1");

        let sent = ch.sent.lock().unwrap();
        let (topic, alert) = &sent[0];
        assert_eq!(topic, "arn:aws:sns:us-east-1:1:alerts");
        assert!(alert.subject.contains("secured"));
        assert_eq!(alert.body["violation_reason"], "no_block_settings");
        assert_eq!(alert.body["action_taken"], "blocked_all_public_access");
        assert_eq!(alert.body["state_before"]["block_public_acls"], false);
        assert_eq!(alert.body["state_after"]["restrict_public_buckets"], true);
        assert_eq!(alert.body["source_event_id"], "ct-1");
    }

    #[test]
    fn test_failed_outcome_alert_carries_error() {
        let verdict = evaluate(&PublicAccessState::unprotected("bucket-x"));
        let outcome = RemediationOutcome {
            resource_id: "bucket-x".into(),
            action_taken: ActionTaken::RemediationFailed,
            state_after: None,
            error: Some(ErrorDetail {
                kind: "unconfirmed".into(),
                message: "still public".into(),
                attempts: 2,
            }),
        };

        let alert = outcome_alert(&event(), &verdict, &outcome).unwrap();
        assert!(alert.subject.contains("FAILED"));
        assert_eq!(alert.body["severity"], "CRITICAL");
        assert_eq!(alert.body["error"]["kind"], "unconfirmed");
    }

    #[tokio::test]
    async fn test_rejected_publish_fails_loudly() {
        let notifier = Notifier::new(channel(true), "arn:aws:sns:us-east-1:1:alerts");
        let verdict = evaluate(&PublicAccessState::unprotected("bucket-x"));

        let alert = outcome_alert(&event(), &verdict, &blocked_outcome()).unwrap();
        let result = notifier.deliver(&alert).await;
        assert!(matches!(result, Err(RemediationError::NotificationDelivery(_))));
    }

    #[test]
    fn test_long_subject_truncated() {
        let long = "x".repeat(250);
        let subject = truncate_subject(&long);
        assert_eq!(subject.chars().count(), MAX_SUBJECT_LEN);
        assert!(subject.ends_with("..."));
    }
}
