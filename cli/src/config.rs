//! `repostream run` arguments and their validation.

use std::path::PathBuf;

use clap::Args;
use thiserror::Error;

use repostream_core::path::Nsid;
use repostream_core::processor::ProcessorConfig;
use repostream_core::retry::RetryConfig;
use repostream_observability::LogConfig;
use repostream_stream::{CursorStore, CursorStoreError, DeliveryFailurePolicy, StreamConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no queue configured: pass --queue-url or set SQS_QUEUE_URL (or use --stdout)")]
    MissingQueueUrl,

    #[error("invalid --nsid `{nsid}`: {reason}")]
    InvalidNsid { nsid: String, reason: String },

    #[error("--max-concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("--cursor must not be negative (got {0})")]
    NegativeCursor(i64),

    #[error("cannot read cursor file: {0}")]
    CursorFile(#[from] CursorStoreError),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// Sequence number to resume after (default: cursor file, else the live head)
    #[arg(long)]
    pub cursor: Option<i64>,

    /// Only forward records of this collection NSID (empty = all)
    #[arg(long, default_value = "")]
    pub nsid: String,

    /// SQS queue URL that receives one message per record operation
    #[arg(long, env = "SQS_QUEUE_URL")]
    pub queue_url: Option<String>,

    /// Print envelopes to stdout instead of sending them to SQS
    #[arg(long)]
    pub stdout: bool,

    /// Relay base URL
    #[arg(long, env = "RELAY_HOST", default_value = "wss://bsky.network")]
    pub relay_host: String,

    /// User-Agent sent when connecting to the relay
    #[arg(long, default_value = concat!("repostream/", env!("CARGO_PKG_VERSION")))]
    pub user_agent: String,

    /// Maximum number of repositories processed concurrently
    #[arg(long, default_value_t = 100)]
    pub max_concurrency: u32,

    /// What to do when a record cannot be delivered: abort | skip
    #[arg(long, default_value = "abort")]
    pub on_delivery_error: DeliveryFailurePolicy,

    /// Retries per delivery before the failure policy applies
    #[arg(long, default_value_t = 3)]
    pub delivery_retries: u32,

    /// File in which the resume cursor is kept across restarts
    #[arg(long)]
    pub cursor_file: Option<PathBuf>,

    /// Log commits whose paths contain this string at info level
    #[arg(long)]
    pub highlight: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkTarget {
    Sqs { queue_url: String },
    Stdout,
}

/// Validated settings for one run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub stream: StreamConfig,
    pub processor: ProcessorConfig,
    pub sink: SinkTarget,
    pub retry: RetryConfig,
    pub cursor: Option<i64>,
    pub cursor_file: Option<PathBuf>,
    pub log: LogConfig,
}

impl RunArgs {
    pub fn into_settings(self) -> Result<RunSettings, ConfigError> {
        let sink = if self.stdout {
            SinkTarget::Stdout
        } else {
            match self.queue_url.filter(|u| !u.trim().is_empty()) {
                Some(queue_url) => SinkTarget::Sqs { queue_url },
                None => return Err(ConfigError::MissingQueueUrl),
            }
        };

        if !self.nsid.is_empty() {
            Nsid::parse(&self.nsid).map_err(|e| ConfigError::InvalidNsid {
                nsid: self.nsid.clone(),
                reason: e.to_string(),
            })?;
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if let Some(cursor) = self.cursor.filter(|c| *c < 0) {
            return Err(ConfigError::NegativeCursor(cursor));
        }

        Ok(RunSettings {
            stream: StreamConfig {
                relay_host: self.relay_host,
                user_agent: self.user_agent,
                max_concurrency: self.max_concurrency,
                on_delivery_error: self.on_delivery_error,
                ..Default::default()
            },
            processor: ProcessorConfig {
                collection_filter: self.nsid,
                highlight: self.highlight,
            },
            sink,
            retry: RetryConfig {
                max_retries: self.delivery_retries,
                ..Default::default()
            },
            cursor: self.cursor,
            cursor_file: self.cursor_file,
            log: LogConfig {
                level: self.log_level,
                json: self.log_json,
                ..Default::default()
            },
        })
    }
}

/// Explicit `--cursor` first, then the stored cursor. `None` (also for an
/// explicit or stored 0) starts at the relay's live head.
pub async fn resolve_start_cursor(
    explicit: Option<i64>,
    store: Option<&dyn CursorStore>,
) -> Result<Option<i64>, ConfigError> {
    let cursor = match (explicit, store) {
        (Some(cursor), _) => Some(cursor),
        (None, Some(store)) => store.load().await?.map(|record| record.cursor),
        (None, None) => None,
    };
    Ok(cursor.filter(|c| *c > 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use repostream_stream::{FirehoseWsListener, MemoryCursorStore};

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(argv: &[&str]) -> RunArgs {
        let mut full = vec!["repostream"];
        full.extend_from_slice(argv);
        TestCli::try_parse_from(full).unwrap().args
    }

    #[test]
    fn stdout_needs_no_queue() {
        let settings = parse(&["--stdout", "--nsid", "app.example.post"]).into_settings().unwrap();
        assert_eq!(settings.sink, SinkTarget::Stdout);
        assert_eq!(settings.processor.collection_filter, "app.example.post");
        assert_eq!(settings.stream.relay_host, "wss://bsky.network");
        assert_eq!(settings.stream.max_concurrency, 100);
        assert_eq!(settings.retry.max_retries, 3);
    }

    #[test]
    fn missing_queue_url_is_rejected() {
        let mut args = parse(&["--stdout"]);
        args.stdout = false;
        args.queue_url = None;
        assert!(matches!(args.into_settings(), Err(ConfigError::MissingQueueUrl)));
    }

    #[test]
    fn queue_url_selects_sqs() {
        let settings = parse(&[
            "--queue-url",
            "https://sqs.us-east-1.amazonaws.com/1/q",
            "--on-delivery-error",
            "skip",
            "--cursor",
            "42",
        ])
        .into_settings()
        .unwrap();
        assert_eq!(
            settings.sink,
            SinkTarget::Sqs {
                queue_url: "https://sqs.us-east-1.amazonaws.com/1/q".into()
            }
        );
        assert_eq!(settings.stream.on_delivery_error, DeliveryFailurePolicy::Skip);
        assert_eq!(settings.cursor, Some(42));
    }

    #[test]
    fn invalid_nsid_and_concurrency_are_rejected() {
        let err = parse(&["--stdout", "--nsid", "not-an-nsid"]).into_settings().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNsid { .. }));

        let err = parse(&["--stdout", "--max-concurrency", "0"]).into_settings().unwrap_err();
        assert!(matches!(err, ConfigError::ZeroConcurrency));
    }

    #[test]
    fn unknown_failure_policy_is_a_parse_error() {
        assert!(TestCli::try_parse_from(["repostream", "--stdout", "--on-delivery-error", "retry"]).is_err());
    }

    #[test]
    fn negative_cursor_is_rejected() {
        let err = parse(&["--stdout", "--cursor=-5"]).into_settings().unwrap_err();
        assert!(matches!(err, ConfigError::NegativeCursor(-5)));
    }

    #[tokio::test]
    async fn start_cursor_precedence() {
        let store = MemoryCursorStore::new();
        assert_eq!(resolve_start_cursor(None, Some(&store)).await.unwrap(), None);

        store.save(500).await.unwrap();
        assert_eq!(resolve_start_cursor(None, Some(&store)).await.unwrap(), Some(500));
        assert_eq!(resolve_start_cursor(Some(7), Some(&store)).await.unwrap(), Some(7));
        assert_eq!(resolve_start_cursor(None, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn default_run_starts_at_live_head() {
        let settings = parse(&["--stdout"]).into_settings().unwrap();
        let cursor = resolve_start_cursor(settings.cursor, None).await.unwrap();
        assert_eq!(cursor, None);

        let listener = FirehoseWsListener::new(&settings.stream.relay_host, "ua").unwrap();
        assert!(!listener.subscribe_url(cursor).as_str().contains("cursor="));

        let explicit_zero = resolve_start_cursor(Some(0), None).await.unwrap();
        assert_eq!(explicit_zero, None);
    }
}
