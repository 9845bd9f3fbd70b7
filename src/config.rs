//! Configuration for Bucket Guard.
//!
//! Loaded once per process from CLI flags with environment fallbacks.

use std::time::Duration;

use clap::Args;
use thiserror::Error;

use crate::agent::guard::GuardSettings;
use crate::retry::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Read retry settings, shared by every command that talks to S3
#[derive(Debug, Clone, Args)]
pub struct RetryArgs {
    /// Attempts for the live state read
    #[arg(long, default_value = "3", env = "INSPECT_MAX_ATTEMPTS")]
    pub inspect_max_attempts: u32,

    /// Delay before the first retry, in milliseconds
    #[arg(long, default_value = "200", env = "RETRY_BASE_DELAY_MS")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single retry delay, in milliseconds
    #[arg(long, default_value = "5000", env = "RETRY_MAX_DELAY_MS")]
    pub retry_max_delay_ms: u64,

    /// Randomize retry delays
    #[arg(long, default_value = "true", env = "RETRY_JITTER", action = clap::ArgAction::Set)]
    pub retry_jitter: bool,
}

impl RetryArgs {
    /// Backoff shape with `max_attempts` attempts
    pub fn policy(&self, max_attempts: u32) -> Result<RetryPolicy, ConfigError> {
        if max_attempts == 0 {
            return Err(ConfigError::Invalid("attempt counts must be at least 1".into()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry base delay ({}ms) exceeds max delay ({}ms)",
                self.retry_base_delay_ms, self.retry_max_delay_ms
            )));
        }

        Ok(RetryPolicy::new(
            max_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
        .with_jitter(self.retry_jitter))
    }

    /// Policy for reading the live public access state
    pub fn inspect_policy(&self) -> Result<RetryPolicy, ConfigError> {
        self.policy(self.inspect_max_attempts)
    }
}

/// Agent settings as they arrive from flags/environment
#[derive(Debug, Clone, Args)]
pub struct GuardArgs {
    /// SNS topic ARN that receives security alerts
    #[arg(long, env = "SNS_TOPIC_ARN")]
    pub topic_arn: String,

    #[command(flatten)]
    pub retry: RetryArgs,

    /// Write+confirm rounds before giving up on a bucket
    #[arg(long, default_value = "2", env = "REMEDIATE_MAX_ATTEMPTS")]
    pub remediate_max_attempts: u32,

    /// Window during which repeated events for a bucket are suppressed
    #[arg(long, default_value = "10", env = "DEDUPE_WINDOW_SECS")]
    pub dedupe_window_secs: u64,

    /// Hard limit on how long a bucket stays in Processing
    #[arg(long, default_value = "60", env = "PROCESSING_TIMEOUT_SECS")]
    pub processing_timeout_secs: u64,

    /// End-to-end deadline for one invocation
    #[arg(long, default_value = "30", env = "INVOCATION_TIMEOUT_SECS")]
    pub invocation_timeout_secs: u64,

    /// Wait before inspecting a just-created bucket, in milliseconds
    #[arg(long, default_value = "2000", env = "SETTLE_DELAY_MS")]
    pub settle_delay_ms: u64,

    /// DynamoDB table for the shared guard (in-process guard when unset)
    #[arg(long, env = "GUARD_TABLE")]
    pub guard_table: Option<String>,

    /// Principal ARN (or ARN prefix) the agent runs as; its own events are skipped
    #[arg(long, env = "SELF_ACTOR_ARN")]
    pub self_actor_arn: Option<String>,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub topic_arn: String,
    pub inspect_retry: RetryPolicy,
    pub remediate_retry: RetryPolicy,
    pub guard: GuardSettings,
    pub invocation_timeout: Duration,
    pub settle_delay: Duration,
    pub guard_table: Option<String>,
    pub self_actor_arn: Option<String>,
}

impl AgentConfig {
    /// Configuration with documented defaults for the given topic
    pub fn new(topic_arn: impl Into<String>) -> Self {
        let base = RetryPolicy::default();
        Self {
            topic_arn: topic_arn.into(),
            inspect_retry: base.clone().with_max_attempts(3),
            remediate_retry: base.with_max_attempts(2),
            guard: GuardSettings::default(),
            invocation_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(2000),
            guard_table: None,
            self_actor_arn: None,
        }
    }
}

impl TryFrom<GuardArgs> for AgentConfig {
    type Error = ConfigError;

    fn try_from(args: GuardArgs) -> Result<Self, Self::Error> {
        if args.topic_arn.trim().is_empty() {
            return Err(ConfigError::Invalid("topic ARN must not be empty".into()));
        }
        if args.dedupe_window_secs == 0
            || args.processing_timeout_secs == 0
            || args.invocation_timeout_secs == 0
        {
            return Err(ConfigError::Invalid(
                "dedupe window and timeouts must be positive".into(),
            ));
        }

        let inspect_retry = args.retry.inspect_policy()?;
        let remediate_retry = args.retry.policy(args.remediate_max_attempts)?;

        Ok(Self {
            topic_arn: args.topic_arn,
            inspect_retry,
            remediate_retry,
            guard: GuardSettings {
                dedupe_window: Duration::from_secs(args.dedupe_window_secs),
                processing_timeout: Duration::from_secs(args.processing_timeout_secs),
            },
            invocation_timeout: Duration::from_secs(args.invocation_timeout_secs),
            settle_delay: Duration::from_millis(args.settle_delay_ms),
            guard_table: args.guard_table.filter(|t| !t.is_empty()),
            self_actor_arn: args.self_actor_arn.filter(|a| !a.is_empty()),
        })
    }
}
