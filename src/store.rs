//! Shared aggregate store: the single durable document every successful fetch
//! is appended to, plus the error type surfaced when it cannot be persisted.

pub mod error;
pub mod file;
pub mod memory;

pub use error::StoreError;
pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::fetch::Payload;
use futures::future::BoxFuture;

pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

/// Lock-guarded aggregate of payloads.
///
/// Every operation runs inside the same critical section, so an `append` is a
/// single read-modify-write step that no other caller can interleave with or
/// observe half-done.
pub trait AggregateStore: Send + Sync + 'static {
    /// Replaces the aggregate with an empty sequence.
    fn reset(&self) -> StoreFuture<'_, ()>;

    /// Appends one payload and returns the new entry count. On error nothing
    /// is committed.
    fn append(&self, payload: Payload) -> StoreFuture<'_, usize>;

    fn size(&self) -> StoreFuture<'_, usize>;

    /// Full contents in append order.
    fn load(&self) -> StoreFuture<'_, Vec<Payload>>;
}
