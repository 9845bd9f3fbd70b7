//! Bucket Guard Agent
//!
//! Detects S3 buckets left open to the public and blocks all public access.
//!
//! # Usage
//! ```bash
//! # Serve the HTTP trigger for EventBridge API destinations
//! bucket-guard serve --topic-arn arn:aws:sns:us-east-1:123456789012:security-alerts
//!
//! # Process a single event payload (file or stdin)
//! bucket-guard process --event event.json
//! cat event.json | bucket-guard process --event -
//!
//! # Read-only audit of one bucket
//! bucket-guard check --bucket my-bucket
//! ```

use std::io::Read;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bucket_guard::agent::evaluator::evaluate;
use bucket_guard::agent::guard::{IdempotencyGuard, InMemoryGuard};
use bucket_guard::agent::inspector::StateInspector;
use bucket_guard::providers::{DynamoGuard, S3AccessConfigApi, SnsChannel};
use bucket_guard::config::RetryArgs;
use bucket_guard::{server, AgentConfig, BucketGuardAgent, GuardArgs};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "bucket-guard")]
#[command(about = "Public S3 bucket remediation agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "json", env = "LOG_FORMAT")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP event trigger
    Serve {
        /// Listen address
        #[arg(long, default_value = "0.0.0.0:8080", env = "LISTEN_ADDR")]
        listen_addr: SocketAddr,

        #[command(flatten)]
        guard: GuardArgs,
    },

    /// Process one event payload and exit
    Process {
        /// Path to the event JSON, or "-" for stdin
        #[arg(long)]
        event: PathBuf,

        #[command(flatten)]
        guard: GuardArgs,
    },

    /// Inspect a bucket and print its verdict without changing anything
    Check {
        /// Bucket name
        #[arg(long)]
        bucket: String,

        #[command(flatten)]
        retry: RetryArgs,
    },
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_format, cli.verbose);

    match cli.command {
        Commands::Serve { listen_addr, guard } => {
            let agent = build_agent(guard).await?;

            let app = server::router(agent);
            info!(addr = %listen_addr, "Bucket Guard listening");

            let listener = tokio::net::TcpListener::bind(listen_addr)
                .await
                .with_context(|| format!("Failed to bind {}", listen_addr))?;
            axum::serve(listener, app).await?;
        }

        Commands::Process { event, guard } => {
            let agent = build_agent(guard).await?;
            let raw = read_event(&event)?;

            let report = agent
                .handle_bytes(&raw)
                .await
                .context("Failed to process event")?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Check { bucket, retry } => {
            let policy = retry.inspect_policy().context("Invalid configuration")?;
            let api = Arc::new(S3AccessConfigApi::from_env().await);
            let inspector = StateInspector::new(api, policy);

            let state = inspector
                .inspect(&bucket)
                .await
                .with_context(|| format!("Failed to inspect bucket {}", bucket))?;
            let verdict = evaluate(&state);

            if verdict.is_violation {
                warn!(bucket = %bucket, reason = %verdict.reason, "Bucket is PUBLIC");
            } else {
                info!(bucket = %bucket, "All public access blocks are enabled");
            }
            println!("{}", serde_json::to_string_pretty(&verdict)?);
        }
    }

    Ok(())
}

fn init_logging(format: &LogFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn build_agent(args: GuardArgs) -> Result<Arc<BucketGuardAgent>> {
    let config = AgentConfig::try_from(args).context("Invalid configuration")?;

    let guard: Arc<dyn IdempotencyGuard> = match &config.guard_table {
        Some(table) => {
            info!(table = %table, "Using DynamoDB guard");
            Arc::new(DynamoGuard::from_env(table.clone(), config.guard).await)
        }
        None => {
            warn!("No GUARD_TABLE set, deduplicating within this process only");
            Arc::new(InMemoryGuard::new(config.guard))
        }
    };

    let api = Arc::new(S3AccessConfigApi::from_env().await);
    let channel = Arc::new(SnsChannel::from_env().await);

    info!(
        topic = %config.topic_arn,
        invocation_timeout_secs = config.invocation_timeout.as_secs(),
        dedupe_window_secs = config.guard.dedupe_window.as_secs(),
        "Bucket Guard configured"
    );

    Ok(Arc::new(BucketGuardAgent::new(api, channel, guard, config)))
}

fn read_event(path: &Path) -> Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read event from stdin")?;
        return Ok(buf);
    }

    std::fs::read(path).with_context(|| format!("Failed to read event file {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_event_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"detail":{"requestParameters":{"bucketName":"b"}}}"#)
            .unwrap();

        let raw = read_event(file.path()).unwrap();
        assert!(raw.starts_with(b"{\"detail\""));
    }

    #[test]
    fn test_read_event_missing_file() {
        let err = read_event(Path::new("/nonexistent/event.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read event file"));
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from([
            "bucket-guard",
            "--log-format",
            "text",
            "process",
            "--event",
            "-",
            "--topic-arn",
            "arn:aws:sns:us-east-1:123456789012:alerts",
        ]);
        assert!(matches!(cli.log_format, LogFormat::Text));
        assert!(matches!(cli.command, Commands::Process { .. }));

        let cli = Cli::parse_from([
            "bucket-guard",
            "check",
            "--bucket",
            "my-bucket",
            "--inspect-max-attempts",
            "5",
        ]);
        match cli.command {
            Commands::Check { bucket, retry } => {
                assert_eq!(bucket, "my-bucket");
                assert_eq!(retry.inspect_policy().unwrap().max_attempts, 5);
            }
            _ => panic!("expected check"),
        }
    }
}
