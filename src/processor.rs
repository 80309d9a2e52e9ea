//! Processor orchestration: the bounded dispatcher, its retry policy, and the
//! per-item resolutions it reports.

pub mod backoff;
pub mod dispatcher;
pub mod summary;
