//! Persistent record of which topics have been published.
//!
//! The state file is a small JSON document keyed by topic id. It is written
//! atomically: a temporary file in the same directory is renamed over the
//! old one, so a crash mid-save never leaves a truncated file behind.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use tracing::{debug, error, warn};

use crate::models::SourceId;
use crate::processor::parse_timestamp;

/// Number of runs kept in the history.
pub const HISTORY_LIMIT: usize = 10;

/// Remote id recorded for topics skipped because the title already exists.
pub const DUPLICATE_MARKER: &str = "duplicate";

/// Errors from loading or saving the state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("State file {path} is corrupt (backed up to {backup}): {source}")]
    Corrupt {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to replace state file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// What was published for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedTopic {
    /// Remote post id, or [`DUPLICATE_MARKER`].
    pub wordpress_id: String,
    pub title: String,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub sync_time: String,
}

/// Summary of one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunRecord {
    pub mode: String,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timestamp: String,
}

/// The on-disk document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
struct StateDocument {
    synced_topics: BTreeMap<String, SyncedTopic>,
    last_sync_time: Option<String>,
    sync_history: Vec<RunRecord>,
}

/// Aggregate figures for `stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatistics {
    pub total_synced: usize,
    pub last_sync_time: Option<String>,
    pub recent_sync: Option<RunRecord>,
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// Sync state bound to a file path.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    doc: StateDocument,
}

impl StateStore {
    /// Loads the state at `path`; a missing file yields an empty state.
    ///
    /// # Errors
    ///
    /// A file that is not valid JSON is copied to `<path>.backup` and
    /// reported as [`StateError::Corrupt`]; it is never overwritten silently.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "No state file yet");
            return Ok(Self::empty(path));
        }

        let text = fs::read_to_string(&path).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;

        match serde_json::from_str(&text) {
            Ok(doc) => Ok(Self { path, doc }),
            Err(source) => {
                let backup = PathBuf::from(format!("{}.backup", path.display()));
                error!(path = %path.display(), error = %source, "State file is corrupt");
                fs::copy(&path, &backup).map_err(|source| StateError::Io {
                    path: backup.clone(),
                    source,
                })?;
                warn!(backup = %backup.display(), "Backed up corrupt state file");
                Err(StateError::Corrupt {
                    path,
                    backup,
                    source,
                })
            }
        }
    }

    /// An empty state that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            doc: StateDocument::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the state to disk atomically.
    pub fn save(&self) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source: std::io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(io_err)?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, &self.doc)?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.flush().map_err(io_err)?;
        tmp.persist(&self.path)?;

        debug!(path = %self.path.display(), topics = self.doc.synced_topics.len(), "Saved state");
        Ok(())
    }

    pub fn is_synced(&self, id: &SourceId) -> bool {
        self.doc.synced_topics.contains_key(id.as_str())
    }

    /// Records a published topic. The first record for an id wins; returns
    /// `false` when the id was already recorded.
    pub fn mark_synced(
        &mut self,
        id: &SourceId,
        wordpress_id: &str,
        title: &str,
        create_time: Option<&str>,
    ) -> bool {
        if self.is_synced(id) {
            warn!(%id, "Topic already recorded, keeping the first entry");
            return false;
        }
        self.doc.synced_topics.insert(
            id.to_string(),
            SyncedTopic {
                wordpress_id: wordpress_id.to_string(),
                title: title.to_string(),
                create_time: create_time.map(str::to_string),
                sync_time: now_rfc3339(),
            },
        );
        true
    }

    pub fn get(&self, id: &SourceId) -> Option<&SyncedTopic> {
        self.doc.synced_topics.get(id.as_str())
    }

    pub fn len(&self) -> usize {
        self.doc.synced_topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.synced_topics.is_empty()
    }

    /// Time of the last completed run, if it parses.
    pub fn last_sync_time(&self) -> Option<OffsetDateTime> {
        let raw = self.doc.last_sync_time.as_deref()?;
        match parse_timestamp(raw) {
            Ok(dt) => Some(dt),
            Err(e) => {
                warn!(error = %e, "Ignoring unparseable last sync time");
                None
            }
        }
    }

    /// Sets the last sync time, defaulting to now.
    pub fn update_last_sync_time(&mut self, at: Option<OffsetDateTime>) {
        let at = at.unwrap_or_else(OffsetDateTime::now_utc);
        self.doc.last_sync_time = at.format(&Rfc3339).ok();
    }

    /// Appends a run to the history, stamping it and keeping the most
    /// recent [`HISTORY_LIMIT`] entries.
    pub fn add_sync_record(&mut self, mut record: RunRecord) {
        record.timestamp = now_rfc3339();
        self.doc.sync_history.push(record);
        let excess = self.doc.sync_history.len().saturating_sub(HISTORY_LIMIT);
        self.doc.sync_history.drain(..excess);
    }

    pub fn history(&self) -> &[RunRecord] {
        &self.doc.sync_history
    }

    pub fn statistics(&self) -> SyncStatistics {
        SyncStatistics {
            total_synced: self.doc.synced_topics.len(),
            last_sync_time: self.doc.last_sync_time.clone(),
            recent_sync: self.doc.sync_history.last().cloned(),
        }
    }

    /// All synced topics, most recently synced first.
    pub fn synced_topics(&self) -> Vec<(&str, &SyncedTopic)> {
        let mut topics: Vec<_> = self
            .doc
            .synced_topics
            .iter()
            .map(|(id, topic)| (id.as_str(), topic))
            .collect();
        topics.sort_by(|a, b| b.1.sync_time.cmp(&a.1.sync_time));
        topics
    }

    /// Titles recorded for more than one topic, with their ids.
    pub fn duplicate_titles(&self) -> Vec<(String, Vec<String>)> {
        let mut by_title: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (id, topic) in &self.doc.synced_topics {
            by_title.entry(topic.title.as_str()).or_default().push(id.clone());
        }
        by_title
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(title, ids)| (title.to_string(), ids))
            .collect()
    }

    pub fn clear_all(&mut self) {
        self.doc = StateDocument::default();
        warn!("Cleared all sync records");
    }

    /// Moves the state file aside as `sync_state_backup_<timestamp>.json`
    /// next to it and starts empty. Returns the backup path, if a file existed.
    pub fn reset_with_backup(&mut self) -> Result<Option<PathBuf>, StateError> {
        let backup = if self.path.exists() {
            let stamp = OffsetDateTime::now_utc()
                .format(format_description!("[year][month][day]_[hour][minute][second]"))
                .unwrap_or_default();
            let name = format!("sync_state_backup_{stamp}.json");
            let backup = match self.path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.join(name),
                _ => PathBuf::from(name),
            };
            fs::rename(&self.path, &backup).map_err(|source| StateError::Io {
                path: self.path.clone(),
                source,
            })?;
            Some(backup)
        } else {
            None
        };

        self.clear_all();
        self.save()?;
        Ok(backup)
    }
}
