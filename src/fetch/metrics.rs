//! Per-request counters for the HTTP worker. Each request lands in exactly one
//! outcome bucket; timeouts are additionally counted as a subset of transport
//! errors. Retries are separate requests, so totals can exceed the item count.

use crate::fetch::outcome::{FailureKind, FetchOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct FetchMetrics {
    successes: AtomicU64,
    transport_errors: AtomicU64,
    status_errors: AtomicU64,
    decode_errors: AtomicU64,
    timeouts: AtomicU64,
    latency_ns: AtomicU64,
    max_latency_ns: AtomicU64,
}

impl FetchMetrics {
    pub(crate) fn record(&self, outcome: &FetchOutcome, latency: Duration) {
        let bucket = match outcome.failure_kind() {
            None => &self.successes,
            Some(FailureKind::TransportError) => &self.transport_errors,
            Some(FailureKind::NonSuccessStatus) => &self.status_errors,
            Some(FailureKind::DecodeError) => &self.decode_errors,
            // Only the dispatcher assigns the remaining kinds.
            Some(_) => return,
        };
        bucket.fetch_add(1, Ordering::Relaxed);

        let nanos = duration_to_nanos(latency);
        self.latency_ns.fetch_add(nanos, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(nanos, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.successes,
            &self.transport_errors,
            &self.status_errors,
            &self.decode_errors,
            &self.timeouts,
            &self.latency_ns,
            &self.max_latency_ns,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> FetchMetricsSnapshot {
        let successes = self.successes.load(Ordering::Relaxed);
        let transport_errors = self.transport_errors.load(Ordering::Relaxed);
        let status_errors = self.status_errors.load(Ordering::Relaxed);
        let decode_errors = self.decode_errors.load(Ordering::Relaxed);
        let requests = successes + transport_errors + status_errors + decode_errors;

        let average_latency_ms = if requests == 0 {
            0.0
        } else {
            nanos_to_ms(self.latency_ns.load(Ordering::Relaxed)) / requests as f64
        };

        FetchMetricsSnapshot {
            requests,
            successes,
            transport_errors,
            status_errors,
            decode_errors,
            timeouts: self.timeouts.load(Ordering::Relaxed),
            average_latency_ms,
            max_latency_ms: nanos_to_ms(self.max_latency_ns.load(Ordering::Relaxed)),
        }
    }
}

fn duration_to_nanos(latency: Duration) -> u64 {
    latency.as_nanos().min(u128::from(u64::MAX)) as u64
}

fn nanos_to_ms(nanos: u64) -> f64 {
    nanos as f64 / 1_000_000.0
}

/// Request-level view of a run, as opposed to the per-item view in the report.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct FetchMetricsSnapshot {
    pub requests: u64,
    pub successes: u64,
    pub transport_errors: u64,
    pub status_errors: u64,
    pub decode_errors: u64,
    pub timeouts: u64,
    pub average_latency_ms: f64,
    pub max_latency_ms: f64,
}

impl FetchMetricsSnapshot {
    pub fn errors(&self) -> u64 {
        self.transport_errors + self.status_errors + self.decode_errors
    }

    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors() as f64 / self.requests as f64
        }
    }
}
