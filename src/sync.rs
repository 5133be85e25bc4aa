//! Sync orchestration: fetch, transform, relay, publish, record.
//!
//! The [`Syncer`] ties the collaborators together. It never aborts a run for
//! a single bad topic; failures are counted in [`SyncStats`] and the topic is
//! retried on the next run because it was never marked synced.

mod stats;
mod syncer;

use thiserror::Error;

use crate::processor::TransformError;
use crate::state::StateError;
use crate::wordpress::WordPressError;
use crate::zsxq::ZsxqError;

pub use stats::SyncStats;
pub use syncer::{
    DEFAULT_MAX_TEST_TOPICS, SAVE_INTERVAL, Syncer, SyncerBuilder, TopicOutcome, test_mode_cap,
};

/// Errors from syncing a topic or running a sync.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Source error: {0}")]
    Source(#[from] ZsxqError),

    #[error("Publish error: {0}")]
    Publish(#[from] WordPressError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("Syncer is missing its {0}")]
    Incomplete(&'static str),
}
