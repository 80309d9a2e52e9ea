use crate::fetch::FailureKind;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

const FAILURE_KINDS: [FailureKind; 6] = [
    FailureKind::TransportError,
    FailureKind::NonSuccessStatus,
    FailureKind::DecodeError,
    FailureKind::PersistenceError,
    FailureKind::Cancelled,
    FailureKind::Panicked,
];

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters for one pipeline run. Purely observational: nothing in
/// the dispatcher reads them back to make decisions.
#[derive(Default, Debug)]
pub struct Telemetry {
    dispatched: AtomicU64,
    committed: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    failures: [AtomicU64; FAILURE_KINDS.len()],
}

impl Telemetry {
    /// Marks one worker invocation as started.
    pub fn record_fetch_started(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
    }

    pub fn record_fetch_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, kind: FailureKind) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.failures[failure_index(kind)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Zeroes every counter before a new run. The in-flight gauge is left
    /// alone since it is balanced by the fetches themselves.
    pub fn reset(&self) {
        for counter in [&self.dispatched, &self.committed, &self.failed, &self.retries] {
            counter.store(0, Ordering::Relaxed);
        }
        for counter in &self.failures {
            counter.store(0, Ordering::Relaxed);
        }
        self.peak_in_flight
            .store(self.in_flight.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn failures_by_kind(&self) -> BTreeMap<FailureKind, u64> {
        FAILURE_KINDS
            .iter()
            .zip(self.failures.iter())
            .filter_map(|(kind, count)| {
                let count = count.load(Ordering::Relaxed);
                (count > 0).then_some((*kind, count))
            })
            .collect()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

/// Renders `kind=count` pairs, e.g. `non_success_status=2,decode_error=1`.
fn format_failure_breakdown(failures: &BTreeMap<FailureKind, u64>) -> String {
    if failures.is_empty() {
        return "none".to_string();
    }
    failures
        .iter()
        .map(|(kind, count)| format!("{kind}={count}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn failure_index(kind: FailureKind) -> usize {
    match kind {
        FailureKind::TransportError => 0,
        FailureKind::NonSuccessStatus => 1,
        FailureKind::DecodeError => 2,
        FailureKind::PersistenceError => 3,
        FailureKind::Cancelled => 4,
        FailureKind::Panicked => 5,
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub dispatched: u64,
    pub committed: u64,
    pub failed: u64,
    pub retries: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

impl TelemetrySnapshot {
    pub fn settled(&self) -> u64 {
        self.committed.saturating_add(self.failed)
    }
}

/// Spawns a background task that periodically logs throughput, settled items, and failures.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    total_items: u64,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so the first report
        // covers a full interval.
        ticker.tick().await;

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "fetchpool::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current_snapshot = telemetry.snapshot();
                    let settled_delta = current_snapshot
                        .settled()
                        .saturating_sub(last_snapshot.settled());
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        settled_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "fetchpool::metrics",
                        throughput = format!("{throughput:.2}"),
                        settled = current_snapshot.settled(),
                        total = total_items,
                        committed = current_snapshot.committed,
                        failed = current_snapshot.failed,
                        failures = %format_failure_breakdown(&telemetry.failures_by_kind()),
                        in_flight = current_snapshot.in_flight,
                        retries = current_snapshot.retries,
                        "runtime metrics snapshot"
                    );

                    last_snapshot = current_snapshot;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
