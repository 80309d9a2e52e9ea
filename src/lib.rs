pub mod catalog;
pub mod fetch;
pub mod processor;
pub mod runtime;
pub mod store;
pub mod verify;

pub use catalog::{WorkCatalog, WorkItem};
pub use fetch::{
    FailureKind, FetchClientOptions, FetchFuture, FetchMetricsSnapshot, FetchOutcome, FetchWorker,
    HttpFetcher, Payload,
};
pub use processor::backoff::RetryPolicy;
pub use processor::dispatcher::Dispatcher;
pub use processor::summary::{ItemResolution, Resolution, RunSummary};
pub use runtime::config::{PipelineConfig, PipelineConfigBuilder, PipelineConfigParams};
pub use runtime::runner::{RunReport, Runner};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::{AggregateStore, JsonFileStore, MemoryStore, StoreError, StoreFuture};
pub use verify::{verify, Verification};
