//! Bucket Guard Library
//!
//! Event-driven remediation of publicly exposed S3 buckets: re-reads the
//! live public access block on every bucket change, blocks all public
//! access when anything is left open, and alerts through SNS.

pub mod agent;
pub mod config;
pub mod error;
pub mod providers;
pub mod retry;
pub mod server;

pub use agent::BucketGuardAgent;
pub use config::{AgentConfig, GuardArgs};
pub use error::{ApiError, RemediationError};
