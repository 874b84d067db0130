//! repostream CLI: stream repository commits from a relay into a queue.
//!
//! # Commands
//! ```text
//! repostream run   [--cursor N] [--nsid <collection>] (--queue-url <url> | --stdout) ...
//! repostream info
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use repostream_core::processor::CommitProcessor;
use repostream_core::retry::RetryPolicy;
use repostream_core::sink::{DeliverySink, RetryingSink, StdoutSink};
use repostream_observability::init_tracing;
use repostream_sqs::SqsSink;
use repostream_stream::{CursorStore, FileCursorStore, FirehoseWsListener, StreamConfig, StreamEngine};

mod config;

use config::{resolve_start_cursor, RunArgs, SinkTarget};

#[derive(Parser)]
#[command(
    name = "repostream",
    about = "Relay commit stream → per-record JSON envelopes on a queue",
    long_about = "
repostream subscribes to a relay's com.atproto.sync.subscribeRepos stream,
verifies and decodes every created or updated record, and sends one JSON
envelope per record operation to an SQS queue (or stdout).

ENVIRONMENT VARIABLES:
  SQS_QUEUE_URL   Queue receiving envelopes (same as --queue-url)
  RELAY_HOST      Relay base URL (same as --relay-host)
  RUST_LOG        Log filter, overrides --log-level
  AWS_*           Standard AWS region / credential settings
",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream commits until interrupted
    Run(RunArgs),

    /// Show defaults and the subscription endpoint
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Info => cmd_info(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(args: RunArgs) -> Result<()> {
    let settings = args.into_settings().context("invalid configuration")?;
    init_tracing(&settings.log).map_err(|e| anyhow!("failed to initialise logging: {e}"))?;

    let policy = RetryPolicy::new(settings.retry.clone());
    let sink: Arc<dyn DeliverySink> = match &settings.sink {
        SinkTarget::Stdout => Arc::new(RetryingSink::new(StdoutSink::new(), policy)),
        SinkTarget::Sqs { queue_url } => {
            Arc::new(RetryingSink::new(SqsSink::from_env(queue_url.clone()).await, policy))
        }
    };
    let processor = Arc::new(CommitProcessor::new(&settings.processor, sink));

    let source = Arc::new(
        FirehoseWsListener::new(&settings.stream.relay_host, settings.stream.user_agent.clone())
            .context("invalid relay endpoint")?
            .with_channel_capacity(settings.stream.channel_capacity),
    );

    let store: Option<Arc<dyn CursorStore>> = settings
        .cursor_file
        .clone()
        .map(|path| Arc::new(FileCursorStore::new(path)) as Arc<dyn CursorStore>);
    let cursor = resolve_start_cursor(settings.cursor, store.as_deref()).await?;

    info!(
        relay = %settings.stream.relay_host,
        cursor = ?cursor,
        nsid = %settings.processor.collection_filter,
        sink = ?settings.sink,
        max_concurrency = settings.stream.max_concurrency,
        on_delivery_error = %settings.stream.on_delivery_error,
        "starting"
    );

    let mut engine = StreamEngine::new(settings.stream, source, processor.clone());
    if let Some(store) = store {
        engine = engine.with_cursor_store(store);
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received, draining");
            shutdown.cancel();
        }
    });

    let summary = engine.run(cursor, shutdown).await?;
    info!(
        last_seq = ?summary.last_seq,
        cursor = ?summary.cursor,
        reconnections = summary.reconnections,
        processed = ?processor.stats(),
        "stopped"
    );
    Ok(())
}

fn cmd_info() -> Result<()> {
    let defaults = StreamConfig::default();
    let listener = FirehoseWsListener::new(&defaults.relay_host, defaults.user_agent.clone())?;

    println!("repostream {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Relay:            {}", defaults.relay_host);
    println!("Subscribe URL:    {}", listener.subscribe_url(None));
    println!("User-Agent:       {}", defaults.user_agent);
    println!("Max concurrency:  {}", defaults.max_concurrency);
    println!("Reconnects:       {} (backoff {} ms, doubling)", defaults.max_reconnects, defaults.backoff_ms);
    println!("Delivery policy:  {}", defaults.on_delivery_error);
    println!();
    println!("Envelope fields:  seq rev time collection rkey action [cid record]");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "cannot install signal handlers, falling back to ctrl-c");
                ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await;
    }
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for ctrl-c; stop the process externally");
        std::future::pending::<()>().await;
    }
}
