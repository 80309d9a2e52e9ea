use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to read or write the aggregate. Any variant means the attempted
/// mutation was not committed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to {action} aggregate at {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("aggregate at {} is not a JSON array of payloads: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode aggregate: {0}")]
    Encode(#[source] serde_json::Error),
}

impl StoreError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            action,
            path: path.into(),
            source,
        }
    }
}
