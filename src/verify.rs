//! Post-run completeness check.

use crate::store::AggregateStore;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verification {
    pub ok: bool,
    pub found: u64,
    pub expected: u64,
}

/// Compares the aggregate's entry count with `expected`.
///
/// Read-only. A store that cannot be read counts as zero entries.
pub async fn verify<S>(store: &S, expected: u64) -> Verification
where
    S: AggregateStore + ?Sized,
{
    let found = match store.size().await {
        Ok(size) => size as u64,
        Err(err) => {
            tracing::error!(error = %err, "failed to read aggregate during verification");
            0
        }
    };

    let verification = Verification {
        ok: found == expected,
        found,
        expected,
    };

    if verification.ok {
        tracing::info!(found, expected, "aggregate verified");
    } else {
        tracing::warn!(found, expected, "aggregate entry count does not match");
    }

    verification
}
