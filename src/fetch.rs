//! Fetch workers: the `FetchWorker` seam, the classified outcome types, and the
//! reqwest-backed HTTP implementation with its options and metrics.

pub mod client;
pub mod metrics;
pub mod options;
pub mod outcome;

pub use client::HttpFetcher;
pub use metrics::FetchMetricsSnapshot;
pub use options::FetchClientOptions;
pub use outcome::{FailureKind, FetchFuture, FetchOutcome, FetchWorker, Payload};
