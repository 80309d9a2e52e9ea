//! HTTP implementation of [`FetchWorker`]. Each item is fetched with a single
//! `GET {base_url}{id}` and classified strictly in order: transport, status,
//! then body decoding.

use crate::catalog::WorkItem;
use crate::fetch::metrics::{FetchMetrics, FetchMetricsSnapshot};
use crate::fetch::options::FetchClientOptions;
use crate::fetch::outcome::{FailureKind, FetchFuture, FetchOutcome, FetchWorker, Payload};
use crate::runtime::config::PipelineConfig;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    base_url: Arc<String>,
    client: reqwest::Client,
    options: FetchClientOptions,
    metrics: Arc<FetchMetrics>,
}

impl FetchWorker for HttpFetcher {
    fn fetch(&self, item: WorkItem) -> FetchFuture<'_> {
        Box::pin(self.fetch_item(item))
    }

    fn metrics(&self) -> Option<FetchMetricsSnapshot> {
        Some(self.metrics.snapshot())
    }

    fn reset_metrics(&self) {
        self.metrics.reset();
    }
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_options(base_url, FetchClientOptions::default())
    }

    pub fn with_options(base_url: impl Into<String>, options: FetchClientOptions) -> Result<Self> {
        options.validate()?;

        let base_url = base_url.into().trim().to_owned();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            bail!("base_url must start with http:// or https://");
        }

        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: Arc::new(base_url),
            client,
            options,
            metrics: Arc::new(FetchMetrics::default()),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        config.validate()?;
        let options = FetchClientOptions {
            request_timeout: config.request_timeout(),
            connect_timeout: config.request_timeout().min(FetchClientOptions::default().connect_timeout),
            ..FetchClientOptions::default()
        };
        Self::with_options(config.base_url().to_owned(), options)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Address of one item: the base URL with the id appended verbatim.
    pub fn resource_url(&self, id: u64) -> String {
        format!("{}{id}", self.base_url)
    }

    /// Fetches one item and records the request in the worker's metrics.
    pub async fn fetch_item(&self, item: WorkItem) -> FetchOutcome {
        let start = Instant::now();
        let outcome = self.request(item.id(), start).await;
        self.metrics.record(&outcome, start.elapsed());
        outcome
    }

    async fn request(&self, id: u64, start: Instant) -> FetchOutcome {
        let url = self.resource_url(id);

        let response = match timeout(self.options.request_timeout, self.client.get(&url).send())
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                if err.is_timeout() {
                    self.metrics.record_timeout();
                }
                tracing::debug!(item = id, url = %url, error = %err, "fetch transport failure");
                return FetchOutcome::failure(
                    id,
                    FailureKind::TransportError,
                    format!("request to {url} failed: {err}"),
                );
            }
            Err(_) => {
                self.metrics.record_timeout();
                tracing::debug!(item = id, url = %url, "fetch timed out");
                return FetchOutcome::failure(
                    id,
                    FailureKind::TransportError,
                    format!(
                        "request to {url} timed out after {}ms",
                        self.options.request_timeout.as_millis()
                    ),
                );
            }
        };

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(item = id, status = status.as_u16(), "fetch returned non-success status");
            return FetchOutcome::failure(
                id,
                FailureKind::NonSuccessStatus,
                format!("received status {status} for item {id}"),
            );
        }

        let limit = self.options.max_response_body_bytes;
        if let Some(length) = response.content_length() {
            if length > limit as u64 {
                return FetchOutcome::failure(
                    id,
                    FailureKind::DecodeError,
                    format!("response body of {length} bytes exceeds limit of {limit} bytes"),
                );
            }
        }

        let remaining = self
            .options
            .request_timeout
            .saturating_sub(start.elapsed())
            .max(std::time::Duration::from_millis(1));
        let body = match timeout(remaining, response.bytes()).await {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => {
                return FetchOutcome::failure(
                    id,
                    FailureKind::TransportError,
                    format!("failed to read response body: {err}"),
                );
            }
            Err(_) => {
                self.metrics.record_timeout();
                return FetchOutcome::failure(
                    id,
                    FailureKind::TransportError,
                    "timed out while reading response body",
                );
            }
        };

        if body.len() > limit {
            return FetchOutcome::failure(
                id,
                FailureKind::DecodeError,
                format!("response body of {} bytes exceeds limit of {limit} bytes", body.len()),
            );
        }

        match decode_payload(&body) {
            Ok(payload) => {
                tracing::trace!(item = id, bytes = body.len(), "fetched payload");
                FetchOutcome::success(id, payload)
            }
            Err(reason) => {
                tracing::debug!(item = id, reason = %reason, "payload could not be decoded");
                FetchOutcome::failure(id, FailureKind::DecodeError, reason)
            }
        }
    }
}

fn decode_payload(body: &[u8]) -> Result<Payload, String> {
    let value: Payload =
        serde_json::from_slice(body).map_err(|err| format!("invalid JSON payload: {err}"))?;
    if !value.is_object() {
        return Err("expected a JSON object payload".to_string());
    }
    Ok(value)
}
