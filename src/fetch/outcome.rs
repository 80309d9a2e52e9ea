use crate::catalog::WorkItem;
use crate::fetch::metrics::FetchMetricsSnapshot;
use futures::future::BoxFuture;
use serde::Serialize;
use std::fmt;

/// A decoded resource. Workers only hand out JSON objects.
pub type Payload = serde_json::Value;

pub type FetchFuture<'a> = BoxFuture<'a, FetchOutcome>;

/// Classification of everything that can keep an item out of the aggregate.
///
/// The first three variants are produced by workers. The remaining ones are
/// assigned by the dispatcher after the worker returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TransportError,
    NonSuccessStatus,
    DecodeError,
    PersistenceError,
    Cancelled,
    Panicked,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::TransportError => "transport_error",
            FailureKind::NonSuccessStatus => "non_success_status",
            FailureKind::DecodeError => "decode_error",
            FailureKind::PersistenceError => "persistence_error",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Panicked => "panicked",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of exactly one worker invocation for one item.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success {
        id: u64,
        payload: Payload,
    },
    Failure {
        id: u64,
        kind: FailureKind,
        reason: String,
    },
}

impl FetchOutcome {
    pub fn success(id: u64, payload: Payload) -> Self {
        FetchOutcome::Success { id, payload }
    }

    pub fn failure(id: u64, kind: FailureKind, reason: impl Into<String>) -> Self {
        FetchOutcome::Failure {
            id,
            kind,
            reason: reason.into(),
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            FetchOutcome::Success { id, .. } | FetchOutcome::Failure { id, .. } => *id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            FetchOutcome::Success { .. } => None,
            FetchOutcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// Retrieves and classifies one remote resource.
///
/// Implementations must not touch pipeline state: everything they learn goes
/// into the returned [`FetchOutcome`]. They are invoked concurrently from many
/// dispatcher tasks and must never retry on their own.
pub trait FetchWorker: Send + Sync + 'static {
    fn fetch(&self, item: WorkItem) -> FetchFuture<'_>;

    /// Request-level counters since the last [`FetchWorker::reset_metrics`],
    /// for workers that keep them.
    fn metrics(&self) -> Option<FetchMetricsSnapshot> {
        None
    }

    fn reset_metrics(&self) {}
}
