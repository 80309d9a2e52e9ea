//! Bounded dispatcher for the fetch-and-persist pipeline.
//!
//! `min(K, N)` tokio tasks drain one shared catalog cursor, so at most K worker
//! invocations are ever in flight and each item is handed out exactly once.
//! Successful payloads are appended to the store from the task that fetched
//! them; every item reports exactly one [`ItemResolution`] back to the
//! collector, which is the join-point the caller awaits.

use super::backoff::{retry_with_backoff, RetryDisposition, RetryPolicy};
use super::summary::{ItemResolution, Resolution, RunSummary};
use crate::catalog::{WorkCatalog, WorkItem, WorkItems};
use crate::fetch::{FailureKind, FetchOutcome, FetchWorker};
use crate::runtime::telemetry::Telemetry;
use crate::store::AggregateStore;
use anyhow::{bail, Result};
use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct Dispatcher {
    concurrency_limit: usize,
    retry: RetryPolicy,
    telemetry: Arc<Telemetry>,
    cancellation: CancellationToken,
}

impl Dispatcher {
    /// Creates a dispatcher that keeps at most `concurrency_limit` fetches in flight.
    pub fn new(concurrency_limit: usize) -> Result<Self> {
        if concurrency_limit == 0 {
            bail!("concurrency_limit must be greater than 0");
        }

        Ok(Self {
            concurrency_limit,
            retry: RetryPolicy::default(),
            telemetry: Arc::new(Telemetry::default()),
            cancellation: CancellationToken::new(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Items that have not settled when the token fires resolve as
    /// [`FailureKind::Cancelled`]. An append already holding the store lock
    /// always completes.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Fetches every catalog item and appends the successes to `store`.
    ///
    /// Returns once every item has settled. Per-item failures never abort the
    /// run; an error is only returned if an item resolved twice or not at all.
    pub async fn run<W, S>(
        &self,
        catalog: &WorkCatalog,
        worker: Arc<W>,
        store: Arc<S>,
    ) -> Result<RunSummary>
    where
        W: FetchWorker,
        S: AggregateStore,
    {
        let total = catalog.len();
        if total == 0 {
            tracing::debug!("catalog is empty; nothing to dispatch");
            return Ok(RunSummary::default());
        }

        let pool_size = (self.concurrency_limit as u64).min(total) as usize;
        tracing::info!(
            items = total,
            concurrency_limit = self.concurrency_limit,
            pool_size,
            max_attempts = self.retry.max_attempts,
            "dispatching work items"
        );

        let cursor = Arc::new(WorkCursor::new(catalog.items()));
        let shared = Arc::new(DispatchShared {
            worker,
            store,
            telemetry: self.telemetry.clone(),
            retry: self.retry,
            cancellation: self.cancellation.clone(),
        });
        let (resolution_tx, mut resolution_rx) = mpsc::unbounded_channel();

        let handles: Vec<_> = (0..pool_size)
            .map(|slot| {
                let cursor = cursor.clone();
                let shared = shared.clone();
                let resolution_tx = resolution_tx.clone();
                tokio::spawn(async move { drain_cursor(slot, cursor, shared, resolution_tx).await })
            })
            .collect();
        drop(resolution_tx);

        for (slot, result) in join_all(handles).await.into_iter().enumerate() {
            if let Err(err) = result {
                tracing::error!(slot, error = %err, "dispatch task terminated abnormally");
            }
        }

        let mut resolved: BTreeMap<u64, ItemResolution> = BTreeMap::new();
        while let Some(item) = resolution_rx.recv().await {
            let id = item.id;
            if resolved.insert(id, item).is_some() {
                tracing::error!(item = id, "item resolved more than once");
                bail!("item {id} was dispatched more than once");
            }
        }

        for item in cursor.drain() {
            self.telemetry.record_failure(FailureKind::Cancelled);
            resolved.insert(
                item.id(),
                failed_resolution(item.id(), 0, FailureKind::Cancelled, "run cancelled before dispatch"),
            );
        }

        let expected = usize::try_from(total).unwrap_or(usize::MAX);
        if resolved.len() != expected {
            let missing = catalog
                .items()
                .map(|item| item.id())
                .find(|id| !resolved.contains_key(id));
            bail!(
                "dispatch settled {} of {} items (first unsettled id: {:?})",
                resolved.len(),
                total,
                missing
            );
        }

        let summary = RunSummary::from_resolutions(resolved.into_values().collect());
        tracing::info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            peak_in_flight = self.telemetry.peak_in_flight(),
            "dispatch complete"
        );
        Ok(summary)
    }
}

struct WorkCursor {
    items: Mutex<WorkItems>,
}

impl WorkCursor {
    fn new(items: WorkItems) -> Self {
        Self {
            items: Mutex::new(items),
        }
    }

    fn next(&self) -> Option<WorkItem> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .next()
    }

    fn drain(&self) -> Vec<WorkItem> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .by_ref()
            .collect()
    }
}

struct DispatchShared<W, S> {
    worker: Arc<W>,
    store: Arc<S>,
    telemetry: Arc<Telemetry>,
    retry: RetryPolicy,
    cancellation: CancellationToken,
}

async fn drain_cursor<W, S>(
    slot: usize,
    cursor: Arc<WorkCursor>,
    shared: Arc<DispatchShared<W, S>>,
    resolution_tx: mpsc::UnboundedSender<ItemResolution>,
) where
    W: FetchWorker,
    S: AggregateStore,
{
    let mut settled = 0usize;

    loop {
        if shared.cancellation.is_cancelled() {
            tracing::debug!(slot, settled, "dispatch slot stopping after cancellation");
            break;
        }
        let Some(item) = cursor.next() else {
            break;
        };
        shared.telemetry.record_dispatched();

        // Outlives an unwind so a panicking attempt is still counted.
        let attempts = AtomicUsize::new(0);
        let resolution = match AssertUnwindSafe(shared.settle(item, &attempts))
            .catch_unwind()
            .await
        {
            Ok(resolution) => resolution,
            Err(panic_payload) => {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(
                    slot,
                    item = item.id(),
                    panic = %panic_msg,
                    "item processing panicked"
                );
                shared.telemetry.record_failure(FailureKind::Panicked);
                failed_resolution(
                    item.id(),
                    attempts.load(Ordering::SeqCst).max(1),
                    FailureKind::Panicked,
                    format!("item processing panicked: {panic_msg}"),
                )
            }
        };

        settled += 1;
        if resolution_tx.send(resolution).is_err() {
            tracing::error!(slot, item = item.id(), "resolution collector dropped");
            break;
        }
    }

    tracing::trace!(slot, settled, "dispatch slot drained");
}

impl<W, S> DispatchShared<W, S>
where
    W: FetchWorker,
    S: AggregateStore,
{
    async fn settle(&self, item: WorkItem, attempts: &AtomicUsize) -> ItemResolution {
        let id = item.id();

        let outcome = retry_with_backoff(
            self.retry,
            Some(&self.cancellation),
            |attempt| {
                attempts.store(attempt, Ordering::SeqCst);
                self.fetch_once(item)
            },
            |outcome: &FetchOutcome| match outcome.failure_kind() {
                Some(FailureKind::TransportError) => RetryDisposition::Retry,
                _ => RetryDisposition::Settle,
            },
            |attempt, backoff, outcome: &FetchOutcome| {
                self.telemetry.record_retry();
                if let FetchOutcome::Failure { reason, .. } = outcome {
                    tracing::warn!(
                        item = id,
                        attempt,
                        backoff_ms = backoff.as_millis().min(u128::from(u64::MAX)) as u64,
                        reason = %reason,
                        "transport failure; retrying item"
                    );
                }
            },
        )
        .await;
        let attempts = attempts.load(Ordering::SeqCst);

        match outcome {
            FetchOutcome::Success { payload, .. } => match self.store.append(payload).await {
                Ok(position) => {
                    self.telemetry.record_committed();
                    tracing::trace!(item = id, position, "payload committed");
                    ItemResolution {
                        id,
                        attempts,
                        resolution: Resolution::Committed { position },
                    }
                }
                Err(err) => {
                    self.telemetry.record_failure(FailureKind::PersistenceError);
                    tracing::warn!(
                        item = id,
                        error = %err,
                        "failed to persist payload; counting item as failed"
                    );
                    failed_resolution(id, attempts, FailureKind::PersistenceError, err.to_string())
                }
            },
            FetchOutcome::Failure { kind, reason, .. } => {
                self.telemetry.record_failure(kind);
                tracing::warn!(item = id, kind = %kind, reason = %reason, "item failed");
                failed_resolution(id, attempts, kind, reason)
            }
        }
    }

    async fn fetch_once(&self, item: WorkItem) -> FetchOutcome {
        let _in_flight = InFlight::enter(&self.telemetry);
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => FetchOutcome::failure(
                item.id(),
                FailureKind::Cancelled,
                "run cancelled while fetching",
            ),
            outcome = self.worker.fetch(item) => outcome,
        }
    }
}

/// Keeps the in-flight gauge balanced even when a worker panics mid-fetch.
struct InFlight<'a> {
    telemetry: &'a Telemetry,
}

impl<'a> InFlight<'a> {
    fn enter(telemetry: &'a Telemetry) -> Self {
        telemetry.record_fetch_started();
        Self { telemetry }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.telemetry.record_fetch_finished();
    }
}

fn failed_resolution(
    id: u64,
    attempts: usize,
    kind: FailureKind,
    reason: impl Into<String>,
) -> ItemResolution {
    ItemResolution {
        id,
        attempts,
        resolution: Resolution::Failed {
            kind,
            reason: reason.into(),
        },
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
