//! Work catalog: the ordered set of item identifiers a run has to settle.

use std::iter::FusedIterator;

/// One unit of fetch work, addressed by a sequential identifier starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkItem {
    id: u64,
}

impl WorkItem {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Generates the identifiers `1..=count` in increasing order.
///
/// The catalog holds no state beyond the count, so [`WorkCatalog::items`] can be
/// called any number of times and always yields the same sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkCatalog {
    count: u64,
}

impl WorkCatalog {
    pub fn new(count: u64) -> Self {
        Self { count }
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn items(&self) -> WorkItems {
        WorkItems {
            next: 1,
            last: self.count,
        }
    }
}

/// Cursor over a [`WorkCatalog`].
#[derive(Debug, Clone)]
pub struct WorkItems {
    next: u64,
    last: u64,
}

impl Iterator for WorkItems {
    type Item = WorkItem;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.last {
            return None;
        }
        let item = WorkItem::new(self.next);
        self.next = self.next.saturating_add(1);
        if item.id() == u64::MAX {
            self.last = 0;
        }
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self
            .last
            .saturating_add(1)
            .saturating_sub(self.next)
            .min(usize::MAX as u64) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for WorkItems {}

impl FusedIterator for WorkItems {}
