use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use pumpsync::agent::{resolve_range, SyncOptions, TimeRangeSync};
use pumpsync::config::Config;
use pumpsync::destination::http::NightscoutClient;
use pumpsync::export::{self, metrics::SyncMetrics};
use pumpsync::feed::http::TandemSourceClient;

/// Syncs insulin pump event feeds into a diabetes tracking service.
#[derive(Parser)]
#[command(name = "pumpsync", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    /// Overrides `log_level` from the configuration file.
    #[arg(long)]
    log_level: Option<String>,

    /// Read and translate events, but write nothing.
    #[arg(long)]
    pretend: bool,

    /// Start of the range to sync (RFC 3339). Default: end minus lookback.
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// End of the range to sync, exclusive (RFC 3339). Default: now.
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Version) = &cli.command {
        println!("pumpsync {}", version::full());
        return Ok(());
    }

    let config_path = cli
        .config
        .as_ref()
        .context("--config is required (use --help for usage)")?;

    let mut cfg = Config::load(config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    cfg.pretend |= cli.pretend;

    let level = cli.log_level.as_deref().unwrap_or(&cfg.log_level);
    let filter =
        EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?;
    fmt().with_env_filter(filter).with_target(true).init();

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting pumpsync",
    );

    let end = cli.end.unwrap_or_else(Utc::now);
    let (start, end) = resolve_range(
        cli.start,
        end,
        cfg.lookback,
        cfg.device.max_date_with_events,
    )?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg, start, end))
}

async fn run(cfg: Config, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    let metrics = Arc::new(SyncMetrics::new().context("creating metrics")?);

    let source_metrics = Arc::clone(&metrics);
    let source = TandemSourceClient::new(&cfg.source)
        .context("creating source client")?
        .with_metrics(Box::new(move |endpoint: &str, status: &str, duration: Duration| {
            source_metrics.record_source_request(endpoint, status, duration);
        }));
    let destination =
        NightscoutClient::new(&cfg.destination).context("creating destination client")?;

    let sync = TimeRangeSync::new(
        Arc::new(source),
        Arc::new(destination),
        cfg.target_device(),
        SyncOptions {
            pretend: cfg.pretend,
            features: cfg.feature_set(),
            failure_policy: cfg.failure_policy,
        },
        Arc::clone(&metrics),
    );

    let result = sync.run(start, end).await;

    if let Some(path) = &cfg.metrics.textfile {
        if let Err(e) = export::write_textfile(path, &metrics) {
            tracing::warn!(error = %e, path = %path.display(), "failed to write metrics textfile");
        }
    }

    let report = result?;

    match report.high_water_mark() {
        Some(mark) => tracing::info!(
            written = report.written,
            max_date_with_events = %mark.to_rfc3339(),
            "sync complete, set device.max_date_with_events to resume from here",
        ),
        None => tracing::info!("sync complete, no events in range"),
    }

    Ok(())
}
