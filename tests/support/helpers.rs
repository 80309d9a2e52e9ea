use std::{
    collections::HashSet,
    path::Path,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::{bail, Result};
use fetchpool::{AggregateStore, JsonFileStore, Payload, PipelineConfig, StoreError, StoreFuture};
use once_cell::sync::Lazy;
use tracing_subscriber::EnvFilter;

static TRACING_SUBSCRIBER: Lazy<()> = Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
});

pub fn init_tracing() {
    Lazy::force(&TRACING_SUBSCRIBER);
}

pub fn pipeline_config(
    base_url: &str,
    item_count: u64,
    concurrency_limit: usize,
    target: &Path,
) -> Result<PipelineConfig> {
    PipelineConfig::builder()
        .base_url(base_url)
        .item_count(item_count)
        .concurrency_limit(concurrency_limit)
        .target_location(target)
        .build()
}

/// Ids of the stored payloads, sorted.
pub fn stored_ids(entries: &[Payload]) -> Vec<u64> {
    let mut ids: Vec<u64> = entries
        .iter()
        .filter_map(|entry| entry.get("id").and_then(Payload::as_u64))
        .collect();
    ids.sort_unstable();
    ids
}

/// Panics with a readable message when an id shows up twice in the aggregate.
pub fn assert_no_duplicates(entries: &[Payload]) {
    let ids = stored_ids(entries);
    let unique: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(unique.len(), ids.len(), "aggregate contains duplicate ids: {ids:?}");
}

pub async fn read_aggregate(path: &Path) -> Result<Vec<Payload>> {
    let bytes = tokio::fs::read(path).await?;
    let value: Payload = serde_json::from_slice(&bytes)?;
    match value {
        Payload::Array(entries) => Ok(entries),
        other => bail!("aggregate is not an array: {other}"),
    }
}

/// File-backed store that refuses appends for selected payload ids and can
/// optionally refuse to reset.
pub struct FaultyStore {
    inner: JsonFileStore,
    reject_ids: HashSet<u64>,
    fail_reset: AtomicBool,
}

impl FaultyStore {
    pub fn new(path: &Path) -> Self {
        Self {
            inner: JsonFileStore::new(path),
            reject_ids: HashSet::new(),
            fail_reset: AtomicBool::new(false),
        }
    }

    pub fn rejecting(mut self, id: u64) -> Self {
        self.reject_ids.insert(id);
        self
    }

    pub fn failing_reset(self) -> Self {
        self.fail_reset.store(true, Ordering::SeqCst);
        self
    }
}

fn injected(action: &'static str, path: &Path, detail: String) -> StoreError {
    StoreError::Io {
        action,
        path: path.to_path_buf(),
        source: std::io::Error::other(detail),
    }
}

impl AggregateStore for FaultyStore {
    fn reset(&self) -> StoreFuture<'_, ()> {
        if self.fail_reset.load(Ordering::SeqCst) {
            let err = injected("reset", self.inner.path(), "read-only filesystem".into());
            return Box::pin(async move { Err(err) });
        }
        self.inner.reset()
    }

    fn append(&self, payload: Payload) -> StoreFuture<'_, usize> {
        let id = payload.get("id").and_then(Payload::as_u64);
        if let Some(id) = id.filter(|id| self.reject_ids.contains(id)) {
            let err = injected(
                "write",
                self.inner.path(),
                format!("no space left while appending item {id}"),
            );
            return Box::pin(async move { Err(err) });
        }
        self.inner.append(payload)
    }

    fn size(&self) -> StoreFuture<'_, usize> {
        self.inner.size()
    }

    fn load(&self) -> StoreFuture<'_, Vec<Payload>> {
        self.inner.load()
    }
}
