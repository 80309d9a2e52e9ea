use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fetchpool::runtime::config::{
    DEFAULT_BASE_URL, DEFAULT_CONCURRENCY_LIMIT, DEFAULT_ITEM_COUNT, DEFAULT_TARGET_LOCATION,
};
use fetchpool::{PipelineConfig, RetryPolicy, RunReport, Runner, Telemetry};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const DEFAULT_LOG_DIRECTIVE: &str = "warn";
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_millis(100);
const STRICT_FAILURE_EXIT: u8 = 2;

/// Fetch a range of JSON resources concurrently and append them to one aggregate file.
#[derive(Debug, Parser)]
#[command(name = "fetchpool", version, about)]
struct Args {
    /// Prefix every item id is appended to.
    #[arg(long, env = "FETCHPOOL_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Number of items to fetch (ids 1..=count).
    #[arg(long, env = "FETCHPOOL_ITEM_COUNT", default_value_t = DEFAULT_ITEM_COUNT)]
    count: u64,

    /// Maximum number of requests in flight.
    #[arg(long, short = 'k', env = "FETCHPOOL_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY_LIMIT)]
    concurrency: usize,

    /// Aggregate document to write.
    #[arg(long, short, env = "FETCHPOOL_OUTPUT", default_value = DEFAULT_TARGET_LOCATION)]
    output: PathBuf,

    /// Entry count the verifier expects. Defaults to --count.
    #[arg(long, env = "FETCHPOOL_EXPECTED_COUNT")]
    expected: Option<u64>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "FETCHPOOL_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,

    /// Attempts per item; attempts after the first only follow transport errors.
    #[arg(long, env = "FETCHPOOL_MAX_ATTEMPTS", default_value_t = 1)]
    max_attempts: usize,

    /// Seconds between metrics log lines.
    #[arg(long, env = "FETCHPOOL_METRICS_INTERVAL_SECS", default_value_t = 5)]
    metrics_interval_secs: u64,

    /// Print the run report as JSON instead of the human summary.
    #[arg(long)]
    json: bool,

    /// Exit non-zero when verification fails.
    #[arg(long, env = "FETCHPOOL_STRICT")]
    strict: bool,

    /// Disable the progress bar.
    #[arg(long)]
    no_progress: bool,
}

impl Args {
    fn to_pipeline_config(&self) -> Result<PipelineConfig> {
        let mut builder = PipelineConfig::builder()
            .base_url(self.base_url.clone())
            .item_count(self.count)
            .concurrency_limit(self.concurrency)
            .target_location(self.output.clone())
            .request_timeout(Duration::from_secs(self.timeout_secs))
            .retry_policy(RetryPolicy::default().with_max_attempts(self.max_attempts))
            .metrics_interval(Duration::from_secs(self.metrics_interval_secs));
        if let Some(expected) = self.expected {
            builder = builder.expected_count(expected);
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_cli_tracing();

    let args = Args::parse();
    let config = args.to_pipeline_config()?;
    let runner = Runner::new(config).context("failed to set up fetch pipeline")?;

    let bar = build_progress_bar(args.count, args.json || args.no_progress)?;
    let progress_shutdown = CancellationToken::new();
    let progress = spawn_progress(bar.clone(), runner.telemetry(), progress_shutdown.clone());

    let result = runner.run_until_ctrl_c().await;
    progress_shutdown.cancel();
    let _ = progress.await;

    let report = match result {
        Ok(report) => {
            bar.finish_and_clear();
            report
        }
        Err(err) => {
            bar.abandon_with_message("pipeline aborted");
            return Err(err);
        }
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to encode run report")?
        );
    } else {
        print_summary(&report, args.count);
    }

    if args.strict && !report.verification_ok {
        return Ok(ExitCode::from(STRICT_FAILURE_EXIT));
    }
    Ok(ExitCode::SUCCESS)
}

fn init_cli_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    fetchpool::init_tracing();
}

fn build_progress_bar(total: u64, hidden: bool) -> Result<ProgressBar> {
    let target = if hidden {
        ProgressDrawTarget::hidden()
    } else {
        ProgressDrawTarget::stderr_with_hz(12)
    };
    let bar = ProgressBar::with_draw_target(Some(total), target);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} items ({per_sec:.2} items/s) {msg}",
    )
    .context("invalid progress bar template")?
    .progress_chars("=>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    Ok(bar)
}

fn spawn_progress(
    bar: ProgressBar,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROGRESS_POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    bar.set_position(snapshot.settled());
                    if snapshot.failed > 0 {
                        bar.set_message(format!("{} failed", snapshot.failed));
                    }
                }
            }
        }
        bar.set_position(telemetry.snapshot().settled());
    })
}

fn print_summary(report: &RunReport, requested: u64) {
    println!("Finished in {:.2} second(s).", report.elapsed_seconds);
    println!(
        "Successfully fetched {} out of {} items.",
        report.succeeded, requested
    );
    for (kind, count) in &report.failures_by_kind {
        println!("  {kind}: {count}");
    }
    if let Some(metrics) = &report.fetch_metrics {
        println!(
            "Sent {} request(s), {} failed ({} timed out); latency avg {:.1} ms, max {:.1} ms.",
            metrics.requests,
            metrics.errors(),
            metrics.timeouts,
            metrics.average_latency_ms,
            metrics.max_latency_ms
        );
    }

    if report.verification_ok {
        println!(
            "\nVerification successful: the aggregate contains the expected {} items.",
            report.expected_count
        );
    } else {
        println!(
            "\nVerification failed: expected {} items, but found {}.",
            report.expected_count, report.verification_found
        );
    }
}
