use super::{AggregateStore, StoreFuture};
use crate::fetch::Payload;
use std::sync::{Mutex, MutexGuard};

/// In-memory aggregate. Not durable, but honours the same single-lock contract
/// as [`super::JsonFileStore`], which makes it the default for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<Payload>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Payload>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AggregateStore for MemoryStore {
    fn reset(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.entries().clear();
            Ok(())
        })
    }

    fn append(&self, payload: Payload) -> StoreFuture<'_, usize> {
        Box::pin(async move {
            let mut entries = self.entries();
            entries.push(payload);
            Ok(entries.len())
        })
    }

    fn size(&self) -> StoreFuture<'_, usize> {
        Box::pin(async move { Ok(self.entries().len()) })
    }

    fn load(&self) -> StoreFuture<'_, Vec<Payload>> {
        Box::pin(async move { Ok(self.entries().clone()) })
    }
}
