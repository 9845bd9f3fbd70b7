//! Bucket Guard Types
//!
//! Core types flowing through one remediation run: the normalized change
//! event, the live public access snapshot, the verdict and the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of bucket change that triggered the run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEventType {
    /// `CreateBucket`
    Created,
    /// Any call touching ACLs, bucket policy or the public access block
    AccessConfigChanged,
    Unknown,
}

impl std::fmt::Display for ChangeEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeEventType::Created => write!(f, "created"),
            ChangeEventType::AccessConfigChanged => write!(f, "access_config_changed"),
            ChangeEventType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Canonical form of an inbound bucket change notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceChangeEvent {
    /// Bucket name
    pub resource_id: String,
    pub event_type: ChangeEventType,
    /// Raw API call name (e.g. `CreateBucket`)
    pub event_name: String,
    /// Principal that made the call
    pub actor: String,
    pub occurred_at: DateTime<Utc>,
    /// CloudTrail event ID, used for log correlation
    pub source_event_id: String,
    pub account: Option<String>,
    pub region: Option<String>,
}

/// Live snapshot of a bucket's public access block configuration
///
/// Never taken from the event payload. Always read from the storage API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicAccessState {
    pub resource_id: String,
    pub block_public_acls: bool,
    pub ignore_public_acls: bool,
    pub block_public_policy: bool,
    pub restrict_public_buckets: bool,
    pub observed_at: DateTime<Utc>,
}

impl PublicAccessState {
    /// State of a bucket with no public access block configured at all
    pub fn unprotected(resource_id: impl Into<String>) -> Self {
        Self::from_flags(resource_id, [false; 4])
    }

    /// Build a snapshot from `[block_acls, ignore_acls, block_policy, restrict_buckets]`
    pub fn from_flags(resource_id: impl Into<String>, flags: [bool; 4]) -> Self {
        Self {
            resource_id: resource_id.into(),
            block_public_acls: flags[0],
            ignore_public_acls: flags[1],
            block_public_policy: flags[2],
            restrict_public_buckets: flags[3],
            observed_at: Utc::now(),
        }
    }

    pub fn flags(&self) -> [bool; 4] {
        [
            self.block_public_acls,
            self.ignore_public_acls,
            self.block_public_policy,
            self.restrict_public_buckets,
        ]
    }

    /// All four settings enabled
    pub fn is_fully_blocked(&self) -> bool {
        self.flags().iter().all(|f| *f)
    }

    /// Compare settings only, ignoring when each snapshot was taken
    pub fn same_settings(&self, other: &PublicAccessState) -> bool {
        self.resource_id == other.resource_id && self.flags() == other.flags()
    }
}

/// Why a bucket is (or is not) in violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationReason {
    /// None of the four settings are enabled
    NoBlockSettings,
    /// Some but not all settings are enabled
    PartialBlockSettings,
    Compliant,
}

impl std::fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationReason::NoBlockSettings => write!(f, "no_block_settings"),
            ViolationReason::PartialBlockSettings => write!(f, "partial_block_settings"),
            ViolationReason::Compliant => write!(f, "compliant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_violation: bool,
    pub reason: ViolationReason,
    pub state_before: PublicAccessState,
}

/// Corrective action recorded for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    None,
    BlockedAllPublicAccess,
    RemediationFailed,
}

impl std::fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionTaken::None => write!(f, "none"),
            ActionTaken::BlockedAllPublicAccess => write!(f, "blocked_all_public_access"),
            ActionTaken::RemediationFailed => write!(f, "remediation_failed"),
        }
    }
}

/// Failure details attached to a failed remediation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub resource_id: String,
    pub action_taken: ActionTaken,
    pub state_after: Option<PublicAccessState>,
    pub error: Option<ErrorDetail>,
}

impl RemediationOutcome {
    pub fn no_action(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            action_taken: ActionTaken::None,
            state_after: None,
            error: None,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.action_taken == ActionTaken::RemediationFailed
    }
}

/// How an invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Remediated,
    RemediationFailed,
    AlreadyCompliant,
    /// Bucket deleted between the event and the inspection
    ResourceGone,
    DuplicateSuppressed,
    /// Event produced by our own corrective write
    SelfTriggeredSuppressed,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Disposition::Remediated => "remediated",
            Disposition::RemediationFailed => "remediation_failed",
            Disposition::AlreadyCompliant => "already_compliant",
            Disposition::ResourceGone => "resource_gone",
            Disposition::DuplicateSuppressed => "duplicate_suppressed",
            Disposition::SelfTriggeredSuppressed => "self_triggered_suppressed",
        };
        write!(f, "{}", s)
    }
}

/// Terminal record of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationReport {
    pub invocation_id: String,
    pub resource_id: String,
    pub source_event_id: String,
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RemediationOutcome>,
    /// Message ID returned by the notification channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<String>,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unprotected_state_is_not_blocked() {
        let state = PublicAccessState::unprotected("bucket-a");
        assert_eq!(state.flags(), [false; 4]);
        assert!(!state.is_fully_blocked());
    }

    #[test]
    fn test_same_settings_ignores_observation_time() {
        let a = PublicAccessState::from_flags("bucket-a", [true; 4]);
        let mut b = a.clone();
        b.observed_at = a.observed_at + chrono::Duration::seconds(30);
        assert!(a.same_settings(&b));

        b.block_public_policy = false;
        assert!(!a.same_settings(&b));
    }

    #[test]
    fn test_disposition_serialization() {
        let json = serde_json::to_string(&Disposition::DuplicateSuppressed).unwrap();
        assert_eq!(json, "\"duplicate_suppressed\"");
        assert_eq!(Disposition::ResourceGone.to_string(), "resource_gone");
    }
}
