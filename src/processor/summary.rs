use crate::fetch::FailureKind;
use serde::Serialize;
use std::collections::BTreeMap;

/// Terminal state of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    /// The payload is part of the aggregate; `position` is the entry count
    /// right after the append.
    Committed { position: usize },
    Failed { kind: FailureKind, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemResolution {
    pub id: u64,
    pub attempts: usize,
    #[serde(flatten)]
    pub resolution: Resolution,
}

impl ItemResolution {
    pub fn is_committed(&self) -> bool {
        matches!(self.resolution, Resolution::Committed { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match &self.resolution {
            Resolution::Committed { .. } => None,
            Resolution::Failed { kind, .. } => Some(*kind),
        }
    }
}

/// Outcome of one dispatcher run: one resolution per catalog item, sorted by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    pub resolutions: Vec<ItemResolution>,
}

impl RunSummary {
    pub(crate) fn from_resolutions(resolutions: Vec<ItemResolution>) -> Self {
        let mut summary = RunSummary {
            resolutions,
            ..RunSummary::default()
        };

        for item in &summary.resolutions {
            match item.failure_kind() {
                None => summary.succeeded += 1,
                Some(kind) => {
                    summary.failed += 1;
                    *summary.failures_by_kind.entry(kind).or_insert(0) += 1;
                }
            }
        }

        summary
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn failed_ids(&self) -> Vec<u64> {
        self.resolutions
            .iter()
            .filter(|item| !item.is_committed())
            .map(|item| item.id)
            .collect()
    }

    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.failures_by_kind.get(&kind).copied().unwrap_or(0)
    }
}
