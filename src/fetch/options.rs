//! Configurable knobs for the HTTP fetch client along with validation so
//! callers can reason about timeouts and response size limits.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_USER_AGENT: &str = concat!("fetchpool/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct FetchClientOptions {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_response_body_bytes: usize,
    pub user_agent: String,
}

impl Default for FetchClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl FetchClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }
        if self.max_response_body_bytes == 0 {
            bail!("max_response_body_bytes must be greater than 0");
        }
        Ok(())
    }
}
