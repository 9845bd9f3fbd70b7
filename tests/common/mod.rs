#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use bucket_guard::agent::guard::{GuardSettings, IdempotencyGuard, InMemoryGuard};
use bucket_guard::agent::PublicAccessState;
use bucket_guard::providers::{AccessConfigApi, Alert, NotificationChannel};
use bucket_guard::retry::RetryPolicy;
use bucket_guard::{AgentConfig, ApiError, BucketGuardAgent};

pub const TOPIC: &str = "arn:aws:sns:us-east-1:123456789012:security-alerts";
pub const AGENT_ROLE: &str = "arn:aws:sts::123456789012:assumed-role/bucket-guard";

/// In-memory stand-in for the S3 public access block API.
///
/// Buckets that were never `put` do not exist. Writes set all four flags
/// unless the bucket was marked with `ignore_writes`.
#[derive(Default)]
pub struct FakeBucketApi {
    buckets: Mutex<HashMap<String, [bool; 4]>>,
    ignored_writes: Mutex<HashSet<String>>,
    vanish_on_write: Mutex<HashSet<String>>,
    transient_reads: AtomicUsize,
    read_delay: Mutex<Option<Duration>>,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
}

impl FakeBucketApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, bucket: &str, flags: [bool; 4]) {
        self.buckets.lock().unwrap().insert(bucket.to_string(), flags);
    }

    pub fn flags(&self, bucket: &str) -> Option<[bool; 4]> {
        self.buckets.lock().unwrap().get(bucket).copied()
    }

    /// Acknowledge writes to `bucket` without applying them.
    pub fn ignore_writes(&self, bucket: &str) {
        self.ignored_writes.lock().unwrap().insert(bucket.to_string());
    }

    /// Delete `bucket` when the first write for it arrives.
    pub fn vanish_on_write(&self, bucket: &str) {
        self.vanish_on_write.lock().unwrap().insert(bucket.to_string());
    }

    /// Fail the next `n` reads with a throttling error.
    pub fn fail_reads(&self, n: usize) {
        self.transient_reads.store(n, Ordering::SeqCst);
    }

    /// Make every read take `delay`.
    pub fn slow_reads(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = Some(delay);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> usize {
        self.read_count() + self.write_count()
    }
}

#[async_trait]
impl AccessConfigApi for FakeBucketApi {
    async fn get_public_access(&self, bucket: &str) -> Result<PublicAccessState, ApiError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let delay = *self.read_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.transient_reads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_reads.store(remaining - 1, Ordering::SeqCst);
            return Err(ApiError::Transient("SlowDown: please reduce your request rate".into()));
        }

        match self.flags(bucket) {
            Some(flags) => Ok(PublicAccessState::from_flags(bucket, flags)),
            None => Err(ApiError::NotFound(bucket.to_string())),
        }
    }

    async fn block_all_public_access(&self, bucket: &str) -> Result<(), ApiError> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        if self.vanish_on_write.lock().unwrap().remove(bucket) {
            self.buckets.lock().unwrap().remove(bucket);
            return Err(ApiError::NotFound(bucket.to_string()));
        }

        let mut buckets = self.buckets.lock().unwrap();
        let Some(flags) = buckets.get_mut(bucket) else {
            return Err(ApiError::NotFound(bucket.to_string()));
        };
        if !self.ignored_writes.lock().unwrap().contains(bucket) {
            *flags = [true; 4];
        }
        Ok(())
    }
}

/// Notification channel that records every published alert.
#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(String, Alert)>>,
    reject: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject every publish from now on.
    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn accept_all(&self) {
        self.reject.store(false, Ordering::SeqCst);
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.sent.lock().unwrap().iter().map(|(_, a)| a.clone()).collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn publish(&self, topic: &str, alert: &Alert) -> Result<String, ApiError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected("AuthorizationError: not allowed to publish".into()));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((topic.to_string(), alert.clone()));
        Ok(format!("msg-{}", sent.len()))
    }
}

/// Configuration tuned for tests: no settle delay, fast deterministic retries.
pub fn test_config() -> AgentConfig {
    let retry = RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(100))
        .with_jitter(false);

    let mut config = AgentConfig::new(TOPIC);
    config.inspect_retry = retry.clone().with_max_attempts(3);
    config.remediate_retry = retry.with_max_attempts(2);
    config.settle_delay = Duration::ZERO;
    config.self_actor_arn = Some(AGENT_ROLE.to_string());
    config
}

pub struct Fixture {
    pub api: Arc<FakeBucketApi>,
    pub channel: Arc<RecordingChannel>,
    pub agent: BucketGuardAgent,
}

pub fn fixture() -> Fixture {
    fixture_with(test_config())
}

pub fn fixture_with(config: AgentConfig) -> Fixture {
    let guard = Arc::new(InMemoryGuard::new(GuardSettings {
        dedupe_window: config.guard.dedupe_window,
        processing_timeout: config.guard.processing_timeout,
    }));
    fixture_with_guard(config, guard)
}

pub fn fixture_with_guard(config: AgentConfig, guard: Arc<dyn IdempotencyGuard>) -> Fixture {
    let api = FakeBucketApi::new();
    let channel = RecordingChannel::new();

    let agent = BucketGuardAgent::new(api.clone(), channel.clone(), guard, config);
    Fixture {
        api,
        channel,
        agent,
    }
}

/// EventBridge envelope around a CloudTrail S3 API call.
pub fn cloudtrail_event(bucket: &str, event_name: &str, event_time: &str) -> Value {
    json!({
        "version": "0",
        "id": "7bf73129-1428-4cd3-a780-95db273d1602",
        "detail-type": "AWS API Call via CloudTrail",
        "source": "aws.s3",
        "account": "123456789012",
        "time": event_time,
        "region": "us-east-1",
        "detail": {
            "eventVersion": "1.08",
            "userIdentity": {
                "type": "IAMUser",
                "principalId": "AIDAEXAMPLE",
                "arn": "arn:aws:iam::123456789012:user/alice"
            },
            "eventTime": event_time,
            "eventSource": "s3.amazonaws.com",
            "eventName": event_name,
            "awsRegion": "us-east-1",
            "requestParameters": {
                "bucketName": bucket,
                "Host": format!("{}.s3.amazonaws.com", bucket)
            },
            "responseElements": null,
            "eventID": format!("evt-{}-{}", bucket, event_time)
        }
    })
}

pub fn with_actor(mut event: Value, arn: &str) -> Value {
    event["detail"]["userIdentity"]["arn"] = json!(arn);
    event
}
