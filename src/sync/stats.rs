use std::fmt;

use serde::Serialize;
use tracing::error;

use crate::state::RunRecord;

use super::{SyncError, TopicOutcome};

/// Counters for one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl SyncStats {
    /// Starts a run over `total` topics.
    pub fn with_total(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Counts one topic's outcome. Anything that did not publish and did not
    /// fail is a skip.
    pub fn record(&mut self, outcome: &Result<TopicOutcome, SyncError>) {
        match outcome {
            Ok(TopicOutcome::Published { .. }) => self.success += 1,
            Ok(_) => self.skipped += 1,
            Err(e) => {
                error!(error = %e, "Topic failed");
                self.failed += 1;
            }
        }
    }

    pub fn processed(&self) -> usize {
        self.success + self.failed + self.skipped
    }

    /// History entry for this run.
    pub fn to_run_record(&self, mode: &str) -> RunRecord {
        RunRecord {
            mode: mode.to_string(),
            total: self.total,
            success: self.success,
            failed: self.failed,
            skipped: self.skipped,
            timestamp: String::new(),
        }
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total {}, success {}, failed {}, skipped {}",
            self.total, self.success, self.failed, self.skipped
        )
    }
}
