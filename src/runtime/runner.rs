use crate::catalog::WorkCatalog;
use crate::fetch::{FailureKind, FetchMetricsSnapshot, FetchWorker, HttpFetcher};
use crate::processor::dispatcher::Dispatcher;
use crate::processor::summary::RunSummary;
use crate::runtime::config::PipelineConfig;
use crate::runtime::telemetry::{spawn_metrics_reporter, Telemetry};
use crate::store::{AggregateStore, JsonFileStore};
use crate::verify::{verify, Verification};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Everything a caller learns from one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub elapsed_seconds: f64,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub failed_ids: Vec<u64>,
    pub verification_ok: bool,
    pub verification_found: u64,
    pub expected_count: u64,
    /// Request-level counters, including retried attempts. Absent when the
    /// worker keeps none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_metrics: Option<FetchMetricsSnapshot>,
}

impl RunReport {
    fn new(
        elapsed: Duration,
        summary: RunSummary,
        verification: Verification,
        fetch_metrics: Option<FetchMetricsSnapshot>,
    ) -> Self {
        let failed_ids = summary.failed_ids();
        Self {
            elapsed_seconds: elapsed.as_secs_f64(),
            succeeded: summary.succeeded,
            failed: summary.failed,
            failures_by_kind: summary.failures_by_kind,
            failed_ids,
            verification_ok: verification.ok,
            verification_found: verification.found,
            expected_count: verification.expected,
            fetch_metrics,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures_by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Wires catalog, worker, store, dispatcher, and verifier into one run and
/// handles OS signals for graceful cancellation.
pub struct Runner<W = HttpFetcher, S = JsonFileStore> {
    config: PipelineConfig,
    worker: Arc<W>,
    store: Arc<S>,
    telemetry: Arc<Telemetry>,
    shutdown: Mutex<CancellationToken>,
}

impl Runner<HttpFetcher, JsonFileStore> {
    /// Builds the HTTP worker and the JSON file store described by `config`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let worker = HttpFetcher::from_config(&config).context("failed to build HTTP fetcher")?;
        let store = JsonFileStore::new(config.target_location());
        Ok(Self::with_components(config, Arc::new(worker), Arc::new(store)))
    }
}

impl<W, S> Runner<W, S>
where
    W: FetchWorker,
    S: AggregateStore,
{
    pub fn with_components(config: PipelineConfig, worker: Arc<W>, store: Arc<S>) -> Self {
        Self {
            config,
            worker,
            store,
            telemetry: Arc::new(Telemetry::default()),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Live counters; safe to poll from another task while [`Runner::run`] is active.
    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    /// Returns a clone of the shutdown token for the current or next run so
    /// external callers can integrate with their own signal handlers.
    ///
    /// Once a run observes a cancelled token, the runner swaps in a fresh one,
    /// so later runs start uncancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn reinitialize_shutdown_token(&self) {
        let mut shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if shutdown.is_cancelled() {
            *shutdown = CancellationToken::new();
        }
    }

    /// Resets the aggregate, dispatches every item, and verifies the result.
    /// Telemetry and worker metrics start from zero on every call.
    ///
    /// Errors are setup failures (invalid configuration, aggregate reset) or
    /// internal dispatch faults. Per-item failures only show up in the report.
    pub async fn run(&self) -> Result<RunReport> {
        self.config
            .validate()
            .context("refusing to start with invalid configuration")?;
        let shutdown = self.cancellation_token();
        let dispatcher = Dispatcher::new(self.config.concurrency_limit())?
            .with_retry_policy(self.config.retry_policy())
            .with_telemetry(self.telemetry.clone())
            .with_cancellation_token(shutdown.clone());

        self.store
            .reset()
            .await
            .context("failed to reset aggregate before fetching")?;

        let catalog = WorkCatalog::new(self.config.item_count());
        self.telemetry.reset();
        self.worker.reset_metrics();
        tracing::info!(
            base_url = self.config.base_url(),
            items = catalog.len(),
            concurrency_limit = self.config.concurrency_limit(),
            target = %self.config.target_location().display(),
            "starting fetch run"
        );

        let reporter_shutdown = CancellationToken::new();
        let reporter = spawn_metrics_reporter(
            self.telemetry.clone(),
            catalog.len(),
            reporter_shutdown.clone(),
            self.config.metrics_interval(),
        );

        let started = Instant::now();
        let summary = dispatcher
            .run(&catalog, self.worker.clone(), self.store.clone())
            .await;
        let elapsed = started.elapsed();
        let fetch_metrics = self.worker.metrics();
        if shutdown.is_cancelled() {
            self.reinitialize_shutdown_token();
        }

        reporter_shutdown.cancel();
        if let Err(err) = reporter.await {
            tracing::warn!(error = %err, "metrics reporter terminated abnormally");
        }

        let summary = summary.context("dispatch did not settle every item")?;
        let verification = verify(self.store.as_ref(), self.config.expected_count()).await;
        let report = RunReport::new(elapsed, summary, verification, fetch_metrics);

        tracing::info!(
            elapsed_seconds = report.elapsed_seconds,
            succeeded = report.succeeded,
            failed = report.failed,
            verification_ok = report.verification_ok,
            "fetch run finished"
        );
        if let Some(metrics) = &report.fetch_metrics {
            tracing::info!(
                requests = metrics.requests,
                errors = metrics.errors(),
                timeouts = metrics.timeouts,
                avg_latency_ms = metrics.average_latency_ms,
                max_latency_ms = metrics.max_latency_ms,
                "fetch request metrics"
            );
        }
        Ok(report)
    }

    /// Same as [`Runner::run`], but a Ctrl-C (SIGINT) cancels outstanding items
    /// and the report covers whatever settled.
    pub async fn run_until_ctrl_c(&self) -> Result<RunReport> {
        let shutdown = self.cancellation_token();
        let run = self.run();
        tokio::pin!(run);

        tokio::select! {
            report = &mut run => report,
            signal = signal::ctrl_c() => {
                match signal {
                    Ok(()) => {
                        tracing::info!("Ctrl-C received; cancelling outstanding items");
                        shutdown.cancel();
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to listen for Ctrl-C; running to completion");
                    }
                }
                run.await
            }
        }
    }
}
