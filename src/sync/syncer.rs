use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rayon::prelude::*;
use regex::Regex;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, SyncTarget, SyncTargetKind, TransformConfig};
use crate::models::{
    COLUMN_NAME_KEY, FULL_ARTICLE_KEY, RecordKind, SYNC_TARGET_KEY, SourceId, SourceRecord,
};
use crate::processor::{TransformError, classify, finalize_body, parse_timestamp, transform};
use crate::relay::{DEFAULT_RELAY_WORKERS, ObjectRelay, PassthroughRelay, relay_all};
use crate::state::{DUPLICATE_MARKER, StateStore};
use crate::wordpress::{PostDraft, Publisher};
use crate::zsxq::{Feed, TopicSource, ZsxqError};

use super::{SyncError, SyncStats};

/// State is saved after this many processed topics.
pub const SAVE_INTERVAL: usize = 10;

/// Per-target cap in test mode when `ZSXQ_MAX_TOPICS` is unset.
pub const DEFAULT_MAX_TEST_TOPICS: usize = 2;

static LINKED_TOPIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/topics/(\d+)").expect("valid linked topic regex"));

/// What happened to one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicOutcome {
    Published { post_id: String },
    /// Recorded by an earlier run.
    AlreadySynced,
    /// Another worker holds this topic right now.
    InFlight,
    /// A remote post already has this title; recorded without publishing.
    Duplicate,
}

/// Reads the test-mode cap from environment-style lookups.
///
/// Returns `None` unless `ZSXQ_TEST_MODE` is truthy; then `ZSXQ_MAX_TOPICS`
/// or [`DEFAULT_MAX_TEST_TOPICS`].
pub fn test_mode_cap(lookup: impl Fn(&str) -> Option<String>) -> Option<usize> {
    let enabled = lookup("ZSXQ_TEST_MODE")
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    if !enabled {
        return None;
    }
    Some(
        lookup("ZSXQ_MAX_TOPICS")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_MAX_TEST_TOPICS),
    )
}

/// Sync state plus the ids currently being published.
struct Ledger {
    store: StateStore,
    in_flight: HashSet<SourceId>,
}

/// Builder for [`Syncer`].
pub struct SyncerBuilder {
    config: AppConfig,
    source: Option<Arc<dyn TopicSource>>,
    publisher: Option<Arc<dyn Publisher>>,
    relay: Option<Arc<dyn ObjectRelay>>,
    state: Option<StateStore>,
    max_topics: Option<usize>,
    detail_retry_delay: Duration,
}

impl SyncerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            source: None,
            publisher: None,
            relay: None,
            state: None,
            max_topics: None,
            detail_retry_delay: Duration::from_secs(1),
        }
    }

    pub fn source(mut self, source: Arc<dyn TopicSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Image relay; defaults to [`PassthroughRelay`].
    pub fn relay(mut self, relay: Arc<dyn ObjectRelay>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn state(mut self, state: StateStore) -> Self {
        self.state = Some(state);
        self
    }

    /// Caps the topics fetched from each target.
    pub fn max_topics(mut self, max: Option<usize>) -> Self {
        self.max_topics = max;
        self
    }

    /// Pause between topic detail fetch attempts.
    pub fn detail_retry_delay(mut self, delay: Duration) -> Self {
        self.detail_retry_delay = delay;
        self
    }

    pub fn build(self) -> Result<Syncer, SyncError> {
        let source = self.source.ok_or(SyncError::Incomplete("topic source"))?;
        let publisher = self.publisher.ok_or(SyncError::Incomplete("publisher"))?;
        let store = self.state.ok_or(SyncError::Incomplete("state store"))?;

        Ok(Syncer {
            transform_config: TransformConfig::from(&self.config),
            config: self.config,
            source,
            publisher,
            relay: self.relay.unwrap_or_else(|| Arc::new(PassthroughRelay)),
            ledger: Mutex::new(Ledger {
                store,
                in_flight: HashSet::new(),
            }),
            max_topics: self.max_topics,
            detail_retry_delay: self.detail_retry_delay,
        })
    }
}

/// Runs syncs against one source, publisher and state file.
///
/// `Syncer` is `Sync`: `sync_topic` may be called from many threads at once.
/// Claiming a topic (not synced and not in flight) and every state write
/// happen under one lock, so a topic is published at most once.
pub struct Syncer {
    config: AppConfig,
    transform_config: TransformConfig,
    source: Arc<dyn TopicSource>,
    publisher: Arc<dyn Publisher>,
    relay: Arc<dyn ObjectRelay>,
    ledger: Mutex<Ledger>,
    max_topics: Option<usize>,
    detail_retry_delay: Duration,
}

impl Syncer {
    /// Runs `f` with the state store locked.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut StateStore) -> R) -> R {
        f(&mut self.ledger.lock().store)
    }

    /// Consumes the syncer, returning its state store.
    pub fn into_state(self) -> StateStore {
        self.ledger.into_inner().store
    }

    /// Checks both remote ends before a run.
    pub fn validate_connections(&self) -> Result<(), SyncError> {
        self.source.validate_connection()?;
        info!("Source connection OK");
        self.publisher.validate_connection()?;
        info!("Publisher connection OK");
        Ok(())
    }

    /// Saves the state file under the state lock.
    pub fn save_state(&self) -> Result<(), SyncError> {
        self.ledger.lock().store.save()?;
        Ok(())
    }

    /// Syncs one topic end to end.
    ///
    /// Already-synced and in-flight topics are skipped before any network
    /// call. A topic that fails is left unrecorded.
    pub fn sync_topic(&self, record: &SourceRecord) -> Result<TopicOutcome, SyncError> {
        let id = record.id().ok_or(TransformError::MissingId)?;

        {
            let mut ledger = self.ledger.lock();
            if ledger.store.is_synced(&id) {
                debug!(%id, "Already synced");
                return Ok(TopicOutcome::AlreadySynced);
            }
            if !ledger.in_flight.insert(id.clone()) {
                debug!(%id, "Claimed by another worker");
                return Ok(TopicOutcome::InFlight);
            }
        }

        let result = self.publish_claimed(&id, record);
        self.ledger.lock().in_flight.remove(&id);
        result
    }

    fn publish_claimed(
        &self,
        id: &SourceId,
        listed: &SourceRecord,
    ) -> Result<TopicOutcome, SyncError> {
        let mut record = if classify(listed).is_article() && self.config.sync.fetch_article_details
        {
            self.fetch_detail(id, listed)
        } else {
            listed.clone()
        };
        self.expand_linked_article(&mut record);

        let mut output = transform(&record, &self.transform_config)?;
        if let Some(category) = category_override(&record) {
            debug!(%id, %category, "Applying target category override");
            output.categories = vec![category];
        }

        if !output.title_sync_disabled && self.publisher.post_exists(&output.title) {
            warn!(%id, title = %output.title, "Post with this title exists, recording as duplicate");
            self.ledger.lock().store.mark_synced(
                id,
                DUPLICATE_MARKER,
                &output.title,
                output.created_at.as_deref(),
            );
            return Ok(TopicOutcome::Duplicate);
        }

        let url_map = relay_all(self.relay.as_ref(), &output.image_urls, DEFAULT_RELAY_WORKERS);
        let draft = PostDraft {
            title: output.title.clone(),
            content: finalize_body(&output, &url_map, &self.transform_config),
            categories: output.categories.clone(),
            tags: output.tag_list(),
            post_type: output.post_type.clone(),
            source_id: id.to_string(),
        };

        let post_id = self.publisher.create_post(&draft)?;
        self.ledger.lock().store.mark_synced(
            id,
            &post_id,
            &output.title,
            output.created_at.as_deref(),
        );
        info!(%id, %post_id, title = %output.title, class = %output.content_class, "Synced topic");
        Ok(TopicOutcome::Published { post_id })
    }

    /// Refetches an article's full detail, falling back to the listed copy.
    fn fetch_detail(&self, id: &SourceId, listed: &SourceRecord) -> SourceRecord {
        let attempts = self.config.sync.detail_fetch_retries.max(1);
        for attempt in 1..=attempts {
            match self.source.get_record(id.as_str()) {
                Ok(Some(mut detail)) => {
                    detail.inherit_attachments(listed);
                    debug!(%id, attempt, "Fetched topic detail");
                    return detail;
                }
                Ok(None) => warn!(%id, attempt, "Topic detail was empty"),
                Err(e) => warn!(%id, attempt, error = %e, "Failed to fetch topic detail"),
            }
            if attempt < attempts && !self.detail_retry_delay.is_zero() {
                thread::sleep(self.detail_retry_delay);
            }
        }
        info!(%id, "Using listed topic content");
        listed.clone()
    }

    /// Replaces a talk's summary with the full text of the article it links
    /// to, when that text is longer, and carries the article's images along.
    fn expand_linked_article(&self, record: &mut SourceRecord) {
        if record.kind() != RecordKind::Talk {
            return;
        }
        let Some(linked_id) = record
            .talk_article()
            .and_then(|a| a.get("article_url"))
            .and_then(Value::as_str)
            .and_then(|url| LINKED_TOPIC.captures(url))
            .map(|caps| caps[1].to_string())
        else {
            return;
        };

        let full = match self.source.get_record(&linked_id) {
            Ok(Some(full)) => full,
            Ok(None) => return,
            Err(e) => {
                warn!(%linked_id, error = %e, "Failed to fetch linked article, keeping summary");
                return;
            }
        };

        let full_text = full
            .raw()
            .get("talk")
            .and_then(|t| t.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if full_text.chars().count() <= record.body_text().chars().count() {
            return;
        }

        info!(%linked_id, chars = full_text.chars().count(), "Using full linked article text");
        let full_text = full_text.to_string();
        record.set_body_text(&full_text);
        if let Some(images) = full.raw().get("images").filter(|v| !v.is_null()) {
            record.attach(FULL_ARTICLE_KEY, json!({ "images": images }));
        }
    }

    /// Fetches every enabled target, newest first, each topic once.
    ///
    /// With no targets configured the group timeline is used. A failing
    /// target is logged and skipped, except for authentication failures,
    /// which no other target would survive.
    pub fn fetch_all_targets(
        &self,
        start_time: Option<OffsetDateTime>,
    ) -> Result<Vec<SourceRecord>, SyncError> {
        let targets = self.config.enabled_targets();
        let plan: Vec<(Feed, Option<&SyncTarget>)> = if targets.is_empty() {
            info!("No sync targets enabled, using the group timeline");
            vec![(Feed::timeline(), None)]
        } else {
            targets.into_iter().map(|t| (Feed::from(t), Some(t))).collect()
        };

        let mut seen = HashSet::new();
        let mut all = Vec::new();

        for (feed, target) in plan {
            let label = target.map_or_else(|| "timeline".to_string(), SyncTarget::display_name);
            let records = match self.source.get_all_records(
                &feed,
                self.config.sync.batch_size,
                start_time,
                self.max_topics,
            ) {
                Ok(records) => records,
                Err(ZsxqError::Authentication) => return Err(ZsxqError::Authentication.into()),
                Err(e) => {
                    error!(target = %label, error = %e, "Failed to fetch target, skipping");
                    continue;
                }
            };
            info!(target = %label, count = records.len(), "Fetched target");

            for mut record in records {
                let Some(id) = record.id() else {
                    warn!(target = %label, "Skipping topic without id");
                    continue;
                };
                if !seen.insert(id) {
                    continue;
                }
                if let Some(target) = target {
                    record.attach(
                        SYNC_TARGET_KEY,
                        serde_json::to_value(target).unwrap_or(Value::Null),
                    );
                    if let (SyncTargetKind::Column, Some(name)) = (target.kind, &target.name) {
                        record.attach(COLUMN_NAME_KEY, Value::String(name.clone()));
                    }
                }
                all.push(record);
            }
        }

        all.sort_by_cached_key(|r| Reverse(r.created_at().and_then(|t| parse_timestamp(t).ok())));
        info!(count = all.len(), "Topics to sync");
        Ok(all)
    }

    /// Syncs every topic of every target, one at a time.
    pub fn sync_full(&self) -> Result<SyncStats, SyncError> {
        info!("Starting full sync");
        let records = self.fetch_all_targets(None)?;
        self.run_sequential("full", &records)
    }

    /// Syncs topics newer than the last run; a first run is a full sync.
    pub fn sync_incremental(&self) -> Result<SyncStats, SyncError> {
        let Some(since) = self.with_state(|s| s.last_sync_time()) else {
            info!("No previous sync, running full sync");
            return self.sync_full();
        };

        info!(%since, "Starting incremental sync");
        let records = self.fetch_all_targets(Some(since))?;
        if records.is_empty() {
            info!("No new topics");
            return Ok(SyncStats::default());
        }
        self.run_sequential("incremental", &records)
    }

    /// Full sync on a pool of `workers` threads.
    pub fn sync_full_concurrent(&self, workers: usize) -> Result<SyncStats, SyncError> {
        info!(workers, "Starting concurrent full sync");
        let records = self.fetch_all_targets(None)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()?;

        let processed = AtomicUsize::new(0);
        let outcomes: Vec<_> = pool.install(|| {
            records
                .par_iter()
                .map(|record| {
                    let outcome = self.sync_topic(record);
                    let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                    if done % SAVE_INTERVAL == 0 {
                        self.save_progress(done);
                    }
                    outcome
                })
                .collect()
        });

        let mut stats = SyncStats::with_total(records.len());
        for outcome in &outcomes {
            stats.record(outcome);
        }
        self.finish_run("concurrent", stats)
    }

    fn run_sequential(&self, mode: &str, records: &[SourceRecord]) -> Result<SyncStats, SyncError> {
        let mut stats = SyncStats::with_total(records.len());
        for (index, record) in records.iter().enumerate() {
            stats.record(&self.sync_topic(record));
            let done = index + 1;
            if done % SAVE_INTERVAL == 0 {
                self.save_progress(done);
            }
        }
        self.finish_run(mode, stats)
    }

    fn save_progress(&self, done: usize) {
        match self.save_state() {
            Ok(()) => debug!(done, "Saved progress"),
            Err(e) => error!(error = %e, "Failed to save progress"),
        }
    }

    fn finish_run(&self, mode: &str, stats: SyncStats) -> Result<SyncStats, SyncError> {
        {
            let mut ledger = self.ledger.lock();
            ledger.store.update_last_sync_time(None);
            ledger.store.add_sync_record(stats.to_run_record(mode));
            ledger.store.save()?;
        }
        info!(mode, %stats, "Sync finished");
        Ok(stats)
    }
}

fn category_override(record: &SourceRecord) -> Option<String> {
    record
        .sync_target()?
        .get("category_override")?
        .as_str()
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_mode_cap_requires_flag() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            let map: HashMap<_, _> = pairs.iter().copied().collect();
            move |key: &str| map.get(key).map(|v| v.to_string())
        };

        assert_eq!(test_mode_cap(env(&[])), None);
        assert_eq!(test_mode_cap(env(&[("ZSXQ_MAX_TOPICS", "5")])), None);
        assert_eq!(test_mode_cap(env(&[("ZSXQ_TEST_MODE", "true")])), Some(2));
        assert_eq!(
            test_mode_cap(env(&[("ZSXQ_TEST_MODE", "1"), ("ZSXQ_MAX_TOPICS", "7")])),
            Some(7)
        );
    }

    #[test]
    fn category_override_reads_attached_target() {
        let mut record = SourceRecord::new(json!({"topic_id": "1"}));
        assert_eq!(category_override(&record), None);

        record.attach(SYNC_TARGET_KEY, json!({"type": "column", "value": "9", "category_override": "读书"}));
        assert_eq!(category_override(&record), Some("读书".to_string()));

        record.attach(SYNC_TARGET_KEY, json!({"type": "column", "value": "9", "category_override": ""}));
        assert_eq!(category_override(&record), None);
    }

    #[test]
    fn linked_topic_id_is_extracted() {
        let caps = LINKED_TOPIC
            .captures("https://wx.zsxq.com/dweb2/index/topic_detail/topics/8855421")
            .unwrap();
        assert_eq!(&caps[1], "8855421");
    }
}
