//! Summaries reported by the expiry sweeper.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of one sweep pass.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct PassSummary {
    pub scanned: usize,
    pub deleted: usize,
    pub errors: usize,
    /// Per-item failure messages, capped at [`PassSummary::MAX_FAILURES`].
    pub failures: Vec<String>,
}

impl PassSummary {
    pub const MAX_FAILURES: usize = 20;

    pub fn record_failure(&mut self, message: impl Into<String>) {
        self.errors += 1;
        if self.failures.len() < Self::MAX_FAILURES {
            self.failures.push(message.into());
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    pub started_at: DateTime<Utc>,
    pub cutoff: DateTime<Utc>,
    pub objects: PassSummary,
    pub shares: PassSummary,
    pub local_files: PassSummary,
}

impl SweepSummary {
    pub fn total_deleted(&self) -> usize {
        self.objects.deleted + self.shares.deleted + self.local_files.deleted
    }
}
