use crate::processor::backoff::RetryPolicy;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://jsonplaceholder.typicode.com/posts/";
pub const DEFAULT_ITEM_COUNT: u64 = 77;
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 16;
pub const DEFAULT_TARGET_LOCATION: &str = "posts.json";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Runtime configuration for one fetch-and-persist run.
///
/// All instances must be constructed via [`PipelineConfig::builder`] or [`PipelineConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    base_url: String,
    item_count: u64,
    concurrency_limit: usize,
    target_location: PathBuf,
    expected_count: u64,
    request_timeout: Duration,
    retry: RetryPolicy,
    metrics_interval: Duration,
}

pub struct PipelineConfigParams {
    pub base_url: String,
    pub item_count: u64,
    pub concurrency_limit: usize,
    pub target_location: PathBuf,
    pub expected_count: u64,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub metrics_interval: Duration,
}

impl PipelineConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`PipelineConfig::builder`] when most values use defaults.
    pub fn new(params: PipelineConfigParams) -> Result<Self> {
        let PipelineConfigParams {
            base_url,
            item_count,
            concurrency_limit,
            target_location,
            expected_count,
            request_timeout,
            retry,
            metrics_interval,
        } = params;

        let config = Self {
            base_url: base_url.trim().to_owned(),
            item_count,
            concurrency_limit,
            target_location,
            expected_count,
            request_timeout,
            retry,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Prefix every item id is appended to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Number of catalog items; ids run `1..=item_count`.
    pub fn item_count(&self) -> u64 {
        self.item_count
    }

    /// Maximum number of fetches in flight at once.
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    /// Path of the aggregate document.
    pub fn target_location(&self) -> &Path {
        &self.target_location
    }

    /// Entry count the verifier expects after the run.
    pub fn expected_count(&self) -> u64 {
        self.expected_count
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_url(&self.base_url)?;

        if self.concurrency_limit == 0 {
            bail!("concurrency_limit must be greater than 0");
        }

        if self.target_location.as_os_str().is_empty() {
            bail!("target_location cannot be empty");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        self.retry.validate()?;
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            item_count: DEFAULT_ITEM_COUNT,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            target_location: PathBuf::from(DEFAULT_TARGET_LOCATION),
            expected_count: DEFAULT_ITEM_COUNT,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PipelineConfigBuilder {
    base_url: Option<String>,
    item_count: Option<u64>,
    concurrency_limit: Option<usize>,
    target_location: Option<PathBuf>,
    expected_count: Option<u64>,
    request_timeout: Option<Duration>,
    retry: Option<RetryPolicy>,
    metrics_interval: Option<Duration>,
}

impl PipelineConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn item_count(mut self, count: u64) -> Self {
        self.item_count = Some(count);
        self
    }

    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn target_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.target_location = Some(path.into());
        self
    }

    /// Overrides the verifier's target. Defaults to `item_count`.
    pub fn expected_count(mut self, count: u64) -> Self {
        self.expected_count = Some(count);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<PipelineConfig> {
        let defaults = PipelineConfig::default();
        let item_count = self.item_count.unwrap_or(defaults.item_count);

        let params = PipelineConfigParams {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            item_count,
            concurrency_limit: self.concurrency_limit.unwrap_or(defaults.concurrency_limit),
            target_location: self.target_location.unwrap_or(defaults.target_location),
            expected_count: self.expected_count.unwrap_or(item_count),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            retry: self.retry.unwrap_or(defaults.retry),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
        };

        PipelineConfig::new(params).context("invalid pipeline configuration")
    }
}

fn validate_url(url: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("base_url must start with http:// or https://");
    }
    Ok(())
}
