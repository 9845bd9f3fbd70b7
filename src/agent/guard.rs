//! Idempotency Guard
//!
//! Deduplicates work on the same bucket across duplicate or closely spaced
//! change events, including the event produced by our own corrective write.
//!
//! Per bucket: `Idle -> Processing -> Settled -> Idle`.
//! - Processing lasts until the lease is released, or until the hard
//!   processing timeout so a crashed run cannot wedge the bucket.
//! - Settled lasts until the dedupe window (measured from acquisition)
//!   elapses. Released-with-failure leases skip Settled so the caller's
//!   retry is not suppressed.
//!
//! A run that changed the bucket but could not deliver its alert releases
//! with [`Completion::PendingNotification`]. The bucket goes straight back
//! to Idle and the undelivered alert rides along on the next lease, so the
//! retried invocation delivers it even though the bucket now looks compliant.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::error::GuardError;
use crate::providers::Alert;

/// Key identifying one dedupe window for a bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupeKey {
    pub resource_id: String,
    /// Event time rounded down to the dedupe window, in epoch seconds
    pub window_start: i64,
}

impl DedupeKey {
    pub fn new(resource_id: &str, occurred_at: DateTime<Utc>, window: Duration) -> Self {
        let window_secs = window.as_secs().max(1) as i64;
        let ts = occurred_at.timestamp();
        Self {
            resource_id: resource_id.to_string(),
            window_start: ts - ts.rem_euclid(window_secs),
        }
    }
}

impl std::fmt::Display for DedupeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.resource_id, self.window_start)
    }
}

/// Proof of ownership of a bucket's Processing slot
#[derive(Debug, Clone, PartialEq)]
pub struct Lease {
    pub key: DedupeKey,
    pub token: Uuid,
    /// Alert an earlier invocation failed to deliver for this bucket
    pub pending: Option<Alert>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardDecision {
    Acquired(Lease),
    /// Another run holds or recently held the bucket
    Suppressed,
}

/// How the run holding a lease finished
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Outcome reported; keep absorbing duplicates until the window ends
    Reported,
    /// Invocation failed; go straight back to Idle
    Failed,
    /// Bucket was acted on but the alert was not delivered; back to Idle,
    /// holding the alert for the next lease
    PendingNotification(Alert),
}

#[derive(Debug, Clone, Copy)]
pub struct GuardSettings {
    pub dedupe_window: Duration,
    pub processing_timeout: Duration,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            dedupe_window: Duration::from_secs(10),
            processing_timeout: Duration::from_secs(60),
        }
    }
}

#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    async fn try_acquire(&self, key: &DedupeKey) -> Result<GuardDecision, GuardError>;

    /// Release a lease. Releasing a stale lease is a no-op.
    async fn release(&self, lease: &Lease, completion: Completion) -> Result<(), GuardError>;
}

#[derive(Debug)]
struct Entry {
    token: Uuid,
    acquired_at: Instant,
    processing: bool,
    settled: bool,
    pending: Option<Alert>,
}

impl Entry {
    fn blocks(&self, now: Instant, settings: &GuardSettings) -> bool {
        let age = now.saturating_duration_since(self.acquired_at);
        (self.processing && age < settings.processing_timeout)
            || (self.settled && age < settings.dedupe_window)
    }
}

/// Guard backed by a process-local map. Correct only when every
/// invocation runs inside the same process.
pub struct InMemoryGuard {
    settings: GuardSettings,
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryGuard {
    pub fn new(settings: GuardSettings) -> Self {
        Self {
            settings,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of buckets currently tracked (Processing or Settled)
    pub fn tracked(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .values()
            .filter(|e| e.blocks(now, &self.settings))
            .count()
    }
}

#[async_trait]
impl IdempotencyGuard for InMemoryGuard {
    async fn try_acquire(&self, key: &DedupeKey) -> Result<GuardDecision, GuardError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        entries.retain(|_, entry| entry.blocks(now, &self.settings) || entry.pending.is_some());

        if let Some(entry) = entries.get(&key.resource_id) {
            if entry.blocks(now, &self.settings) {
                debug!(key = %key, "Bucket already in flight or settled");
                return Ok(GuardDecision::Suppressed);
            }
        }

        // The held alert stays on the entry until a release clears it, so a
        // run that crashes before delivering does not lose it.
        let pending = entries
            .remove(&key.resource_id)
            .and_then(|entry| entry.pending);

        let token = Uuid::new_v4();
        entries.insert(
            key.resource_id.clone(),
            Entry {
                token,
                acquired_at: now,
                processing: true,
                settled: true,
                pending: pending.clone(),
            },
        );

        Ok(GuardDecision::Acquired(Lease {
            key: key.clone(),
            token,
            pending,
        }))
    }

    async fn release(&self, lease: &Lease, completion: Completion) -> Result<(), GuardError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get_mut(&lease.key.resource_id) {
            Some(entry) if entry.token == lease.token => match completion {
                Completion::Reported => {
                    entry.processing = false;
                    entry.pending = None;
                }
                Completion::Failed => {
                    entries.remove(&lease.key.resource_id);
                }
                Completion::PendingNotification(alert) => {
                    entry.processing = false;
                    entry.settled = false;
                    entry.pending = Some(alert);
                }
            },
            _ => debug!(key = %lease.key, "Ignoring release of stale lease"),
        }

        Ok(())
    }
}
