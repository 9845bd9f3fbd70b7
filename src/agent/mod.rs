//! Public Bucket Remediation Agent
//!
//! Handles one bucket change event per invocation:
//!
//! ```text
//! normalize -> guard.acquire -> held alert? -> inspect -> evaluate -> remediate? -> notify -> guard.release
//! ```
//!
//! ## Guarantees
//!
//! - The event payload is never trusted for public access state; the bucket
//!   is always re-read from the storage API.
//! - Duplicate events inside the dedupe window are suppressed before any
//!   API call, so each real violation is reported once.
//! - Every invocation ends with exactly one [`InvocationReport`] or one
//!   [`RemediationError`].
//! - An outcome alert that fails to publish is kept on the guard entry and
//!   delivered by the next invocation for the bucket.
//!
//! ## Example Usage
//!
//! ```ignore
//! use bucket_guard::agent::BucketGuardAgent;
//!
//! let agent = BucketGuardAgent::new(s3, sns, guard, config);
//! let report = agent.handle(&payload).await?;
//! println!("{}: {}", report.resource_id, report.disposition);
//! ```

pub mod evaluator;
pub mod guard;
pub mod inspector;
pub mod normalizer;
pub mod notifier;
pub mod remediator;
pub mod types;

pub use guard::{Completion, DedupeKey, GuardDecision, IdempotencyGuard, InMemoryGuard, Lease};
pub use types::*;

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::AgentConfig;
use crate::error::{RemediationError, Result};
use crate::providers::{AccessConfigApi, Alert, NotificationChannel};
use inspector::StateInspector;
use notifier::Notifier;
use remediator::Remediator;

/// Event-driven public bucket remediation agent
pub struct BucketGuardAgent {
    inspector: StateInspector,
    remediator: Remediator,
    notifier: Notifier,
    guard: Arc<dyn IdempotencyGuard>,
    config: AgentConfig,
}

/// Intermediate result of the guarded part of an invocation
struct Processed {
    disposition: Disposition,
    verdict: Option<Verdict>,
    outcome: Option<RemediationOutcome>,
    notification_id: Option<String>,
}

/// Failure of the guarded part, with the outcome alert if the bucket was
/// acted on but the alert never went out
struct Failure {
    error: RemediationError,
    undelivered: Option<Alert>,
}

impl From<RemediationError> for Failure {
    fn from(error: RemediationError) -> Self {
        Self {
            error,
            undelivered: None,
        }
    }
}

impl BucketGuardAgent {
    pub fn new(
        api: Arc<dyn AccessConfigApi>,
        channel: Arc<dyn NotificationChannel>,
        guard: Arc<dyn IdempotencyGuard>,
        config: AgentConfig,
    ) -> Self {
        Self {
            inspector: StateInspector::new(api.clone(), config.inspect_retry.clone()),
            remediator: Remediator::new(api, config.remediate_retry.clone()),
            notifier: Notifier::new(channel, config.topic_arn.clone()),
            guard,
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Handle a raw (unparsed) event payload.
    pub async fn handle_bytes(&self, raw: &[u8]) -> Result<InvocationReport> {
        let event = normalizer::normalize_bytes(raw).inspect_err(|e| {
            warn!(error = %e, "Rejected malformed event");
        })?;
        self.handle_event(event).await
    }

    /// Handle a parsed event payload.
    pub async fn handle(&self, payload: &serde_json::Value) -> Result<InvocationReport> {
        let event = normalizer::normalize(payload).inspect_err(|e| {
            warn!(error = %e, "Rejected malformed event");
        })?;
        self.handle_event(event).await
    }

    /// Handle an already normalized event.
    pub async fn handle_event(&self, event: ResourceChangeEvent) -> Result<InvocationReport> {
        let invocation_id = Uuid::new_v4().to_string();
        let span = info_span!(
            "invocation",
            invocation_id = %invocation_id,
            bucket = %event.resource_id,
            source_event_id = %event.source_event_id,
        );

        self.run(invocation_id, event).instrument(span).await
    }

    async fn run(&self, invocation_id: String, event: ResourceChangeEvent) -> Result<InvocationReport> {
        let start = Instant::now();
        info!(
            stage = "received",
            event_type = %event.event_type,
            event_name = %event.event_name,
            actor = %event.actor,
            "Bucket change event received"
        );

        let report = |processed: Processed| InvocationReport {
            invocation_id: invocation_id.clone(),
            resource_id: event.resource_id.clone(),
            source_event_id: event.source_event_id.clone(),
            disposition: processed.disposition,
            verdict: processed.verdict,
            outcome: processed.outcome,
            notification_id: processed.notification_id,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        if self.is_self_triggered(&event) {
            info!(stage = "suppressed", reason = "self_triggered", "Skipping our own change event");
            return Ok(report(Processed::terminal(Disposition::SelfTriggeredSuppressed)));
        }

        let key = DedupeKey::new(&event.resource_id, event.occurred_at, self.config.guard.dedupe_window);
        let lease = match self.guard.try_acquire(&key).await {
            Ok(GuardDecision::Acquired(lease)) => lease,
            Ok(GuardDecision::Suppressed) => {
                info!(stage = "suppressed", reason = "duplicate", key = %key, "Duplicate event suppressed");
                return Ok(report(Processed::terminal(Disposition::DuplicateSuppressed)));
            }
            Err(e) => return Err(self.fail(&event, e.into()).await),
        };

        // An earlier invocation acted on this bucket but could not report it
        let mut redelivered = None;
        if let Some(alert) = &lease.pending {
            match self.notifier.deliver(alert).await {
                Ok(message_id) => {
                    info!(stage = "notified", message_id = %message_id, "Delivered held alert");
                    redelivered = Some(message_id);
                }
                Err(e) => {
                    self.release(&lease, Completion::PendingNotification(alert.clone()))
                        .await;
                    return Err(self.fail(&event, e).await);
                }
            }
        }

        let result = match tokio::time::timeout(self.config.invocation_timeout, self.process(&event)).await {
            Ok(result) => result,
            Err(_) => Err(RemediationError::Timeout(self.config.invocation_timeout.as_secs()).into()),
        };

        let completion = match &result {
            Ok(_) => Completion::Reported,
            Err(Failure {
                undelivered: Some(alert),
                ..
            }) => Completion::PendingNotification(alert.clone()),
            Err(_) => Completion::Failed,
        };
        self.release(&lease, completion).await;

        match result {
            Ok(mut processed) => {
                if processed.notification_id.is_none() {
                    processed.notification_id = redelivered;
                }
                let report = report(processed);
                info!(
                    stage = "completed",
                    disposition = %report.disposition,
                    elapsed_ms = report.elapsed_ms,
                    "Invocation complete"
                );
                Ok(report)
            }
            Err(failure) => Err(self.fail(&event, failure.error).await),
        }
    }

    async fn release(&self, lease: &Lease, completion: Completion) {
        if let Err(e) = self.guard.release(lease, completion).await {
            warn!(key = %lease.key, error = %e, "Failed to release guard lease");
        }
    }

    /// Log a failed invocation and alert operators when warranted.
    async fn fail(&self, event: &ResourceChangeEvent, e: RemediationError) -> RemediationError {
        error!(stage = "failed", kind = e.kind(), error = %e, "Invocation failed");
        if e.warrants_error_alert() {
            if let Err(alert_err) = self.notifier.notify_error(event, &e).await {
                error!(error = %alert_err, "Could not deliver error alert");
            }
        }
        e
    }

    /// Inspect, evaluate, remediate and notify under a held lease.
    async fn process(&self, event: &ResourceChangeEvent) -> std::result::Result<Processed, Failure> {
        if event.event_type == ChangeEventType::Created && !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        let state = match self.inspector.inspect(&event.resource_id).await {
            Ok(state) => state,
            Err(RemediationError::ResourceNotFound(_)) => {
                info!(stage = "inspected", "Bucket no longer exists, nothing to do");
                return Ok(Processed::terminal(Disposition::ResourceGone));
            }
            Err(e) => return Err(e.into()),
        };
        info!(stage = "inspected", flags = ?state.flags(), "Live public access state read");

        let verdict = evaluator::evaluate(&state);
        info!(
            stage = "evaluated",
            is_violation = verdict.is_violation,
            reason = %verdict.reason,
            "Verdict reached"
        );

        if !verdict.is_violation {
            return Ok(Processed {
                disposition: Disposition::AlreadyCompliant,
                outcome: Some(RemediationOutcome::no_action(&event.resource_id)),
                verdict: Some(verdict),
                notification_id: None,
            });
        }

        warn!(reason = %verdict.reason, "Public bucket detected, remediating");
        let outcome = match self.remediator.remediate(&verdict).await {
            Ok(outcome) => outcome,
            Err(RemediationError::ResourceNotFound(_)) => {
                info!(stage = "remediated", "Bucket deleted during remediation");
                return Ok(Processed {
                    disposition: Disposition::ResourceGone,
                    verdict: Some(verdict),
                    outcome: None,
                    notification_id: None,
                });
            }
            Err(e) => return Err(e.into()),
        };
        info!(stage = "remediated", action = %outcome.action_taken, "Action taken");

        let notification_id = match notifier::outcome_alert(event, &verdict, &outcome) {
            Some(alert) => match self.notifier.deliver(&alert).await {
                Ok(message_id) => {
                    info!(stage = "notified", message_id = %message_id, "Outcome reported");
                    Some(message_id)
                }
                Err(error) => {
                    return Err(Failure {
                        error,
                        undelivered: Some(alert),
                    })
                }
            },
            None => None,
        };

        Ok(Processed {
            disposition: if outcome.is_failure() {
                Disposition::RemediationFailed
            } else {
                Disposition::Remediated
            },
            verdict: Some(verdict),
            outcome: Some(outcome),
            notification_id,
        })
    }

    /// Assumed-role ARNs carry a per-session suffix, so the configured ARN
    /// matches as a prefix.
    fn is_self_triggered(&self, event: &ResourceChangeEvent) -> bool {
        matches!(&self.config.self_actor_arn, Some(me) if event.actor.starts_with(me.as_str()))
    }
}

impl Processed {
    fn terminal(disposition: Disposition) -> Self {
        Self {
            disposition,
            verdict: None,
            outcome: None,
            notification_id: None,
        }
    }
}
