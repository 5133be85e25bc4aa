/// Source platform HTTP client implementation.
///
/// This module provides `ZsxqClient` for making synchronous requests to the
/// topic API, the `TopicSource` trait the orchestrator consumes, and the
/// retry helpers shared by every request.
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::config::{SyncTarget, SyncTargetKind, ZsxqConfig};
use crate::models::SourceRecord;
use crate::processor::parse_timestamp;

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.zsxq.com/v2";

/// The API refuses pages larger than this.
pub const MAX_PAGE_SIZE: usize = 50;

/// Errors that can occur when talking to the topic API.
#[derive(Debug, Error)]
pub enum ZsxqError {
    /// Network-related errors (connection failures, DNS resolution, bad bodies)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// HTTP errors with status code
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// The access token was rejected
    #[error("Authentication failed: access token is invalid or expired")]
    Authentication,

    /// HTTP 429
    #[error("Rate limited by the API")]
    RateLimited,

    /// A well-formed response reporting failure
    #[error("API error (code {code:?}): {message}")]
    Api { code: Option<i64>, message: String },

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Credentials that cannot be sent as HTTP headers, or are missing
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),
}

/// Retry policy: attempt count and exponential delay bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    /// A policy with the given attempt count and no sleeping, for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Runs `f` until it succeeds, fails with a non-retryable error, or the
/// attempts in `backoff` are used up.
///
/// Delays double from `initial_delay` and are capped at `max_delay`.
pub fn retry_with_backoff<F, T>(backoff: &Backoff, mut f: F) -> Result<T, ZsxqError>
where
    F: FnMut() -> Result<T, ZsxqError>,
{
    let attempts = backoff.max_attempts.max(1);
    let mut retry = 0;

    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                retry += 1;
                if retry >= attempts {
                    return Err(e);
                }
                let delay = backoff.delay_for(retry - 1);
                warn!(error = %e, attempt = retry, ?delay, "Request failed, retrying");
                thread::sleep(delay);
            }
        }
    }
}

/// Returns `true` for transient errors: network failures, HTTP 5xx and 429.
fn should_retry(error: &ZsxqError) -> bool {
    match error {
        ZsxqError::Network(_) => true,
        ZsxqError::RateLimited => true,
        ZsxqError::Http { status } => (500..600).contains(status),
        ZsxqError::Authentication => false,
        ZsxqError::Api { .. } => false,
        ZsxqError::InvalidUrl(_) => false,
        ZsxqError::InvalidConfig(_) => false,
    }
}

/// Unwraps the API envelope, returning `resp_data`.
///
/// The API does not always send `succeeded`, so only an explicit `false`
/// counts as failure; `code == 401` means the token was rejected.
pub fn check_envelope(body: Value) -> Result<Value, ZsxqError> {
    let code = body.get("code").and_then(Value::as_i64);
    if code == Some(401) {
        return Err(ZsxqError::Authentication);
    }

    if body.get("succeeded").and_then(Value::as_bool) == Some(false) {
        let message = ["error", "info", "message"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .unwrap_or("request did not succeed")
            .to_string();
        return Err(ZsxqError::Api { code, message });
    }

    Ok(body.get("resp_data").cloned().unwrap_or(Value::Null))
}

/// A topic listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// The group timeline, optionally filtered by scope (`all`, `digests`, ...).
    Group { scope: Option<String> },
    Column(String),
    Hashtag(String),
}

impl Feed {
    /// The whole group timeline.
    pub fn timeline() -> Self {
        Self::Group { scope: None }
    }

    fn path(&self, group_id: &str) -> String {
        match self {
            Self::Group { .. } => format!("/groups/{group_id}/topics"),
            Self::Column(id) => format!("/groups/{group_id}/columns/{id}/topics"),
            Self::Hashtag(id) => format!("/hashtags/{id}/topics"),
        }
    }

    fn scope(&self) -> Option<&str> {
        match self {
            Self::Group { scope } => scope.as_deref().filter(|s| !s.is_empty()),
            _ => None,
        }
    }
}

impl From<&SyncTarget> for Feed {
    fn from(target: &SyncTarget) -> Self {
        match target.kind {
            SyncTargetKind::Scope => Self::Group {
                scope: Some(target.value.clone()),
            },
            SyncTargetKind::Column => Self::Column(target.value.clone()),
            SyncTargetKind::Hashtag => Self::Hashtag(target.value.clone()),
        }
    }
}

/// Trait for topic source operations.
///
/// This trait enables mocking in tests and provides a clean interface for
/// the orchestrator. Only `get_page` touches the network; pagination lives
/// in the provided `get_all_records`.
pub trait TopicSource: Send + Sync {
    /// Checks that the credentials work.
    fn validate_connection(&self) -> Result<(), ZsxqError>;

    /// Fetches one topic with its full detail, `None` when the API returns
    /// no topic.
    fn get_record(&self, id: &str) -> Result<Option<SourceRecord>, ZsxqError>;

    /// Fetches one page of topics older than `end_time`, newest first.
    fn get_page(
        &self,
        feed: &Feed,
        count: usize,
        end_time: Option<&str>,
    ) -> Result<Vec<SourceRecord>, ZsxqError>;

    /// Walks a feed page by page.
    ///
    /// Stops at a short or empty page, at the first topic not newer than
    /// `start_time`, or once `max_items` topics are collected. Topics seen
    /// on an earlier page are skipped.
    fn get_all_records(
        &self,
        feed: &Feed,
        batch_size: usize,
        start_time: Option<OffsetDateTime>,
        max_items: Option<usize>,
    ) -> Result<Vec<SourceRecord>, ZsxqError> {
        let batch_size = batch_size.clamp(1, MAX_PAGE_SIZE);
        let mut records = Vec::new();
        let mut seen = HashSet::new();
        let mut end_time: Option<String> = None;

        loop {
            let count = match max_items {
                Some(max) if records.len() >= max => {
                    info!(max, "Reached topic limit");
                    break;
                }
                Some(max) => batch_size.min(max - records.len()),
                None => batch_size,
            };

            let page = self.get_page(feed, count, end_time.as_deref())?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            let next_end_time = page
                .last()
                .and_then(|record| record.created_at().map(str::to_string));

            for record in page {
                if let (Some(start), Some(created_at)) = (start_time, record.created_at()) {
                    match parse_timestamp(created_at) {
                        Ok(dt) if dt <= start => {
                            info!(%created_at, "Reached previously synced topics");
                            return Ok(records);
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "Keeping topic with unparseable time"),
                    }
                }
                let key = record.id().map(|id| id.to_string());
                if key.as_ref().is_none_or(|k| seen.insert(k.clone())) {
                    records.push(record);
                }
            }
            info!(fetched = records.len(), "Fetched topic page");

            if page_len < count {
                break;
            }
            match next_end_time {
                Some(next) if end_time.as_deref() != Some(next.as_str()) => end_time = Some(next),
                _ => break,
            }
        }

        if let Some(max) = max_items {
            records.truncate(max);
        }
        Ok(records)
    }
}

/// Builder for constructing `ZsxqClient` instances.
///
/// # Examples
///
/// ```
/// use zsxq_sync::zsxq::ZsxqClientBuilder;
///
/// let client = ZsxqClientBuilder::new()
///     .access_token("token")
///     .group_id("123456")
///     .build()
///     .expect("Failed to create client");
/// assert_eq!(client.group_id(), "123456");
/// ```
#[derive(Debug, Default)]
pub struct ZsxqClientBuilder {
    access_token: Option<String>,
    user_agent: Option<String>,
    group_id: Option<String>,
    base_url: Option<String>,
    backoff: Option<Backoff>,
    request_delay: Option<Duration>,
}

impl ZsxqClientBuilder {
    /// Creates a new `ZsxqClientBuilder` with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a builder from the `zsxq` config section.
    pub fn from_config(config: &ZsxqConfig) -> Self {
        Self::new()
            .access_token(&config.access_token)
            .user_agent(&config.user_agent)
            .group_id(&config.group_id)
    }

    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn group_id(mut self, id: impl Into<String>) -> Self {
        self.group_id = Some(id.into());
        self
    }

    /// Overrides the API root (default [`DEFAULT_BASE_URL`]).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the retry policy; `max_retries` in config maps to `max_attempts`.
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Pause after every request, to stay under the API's rate limit.
    pub fn request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = Some(delay);
        self
    }

    /// Builds the `ZsxqClient` with the configured settings.
    ///
    /// Fails with `InvalidConfig` when the token or group id is missing or
    /// not a valid header value, and `InvalidUrl` for a bad base URL.
    pub fn build(self) -> Result<ZsxqClient, ZsxqError> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ZsxqError::InvalidConfig("access token is required".to_string()))?;
        let group_id = self
            .group_id
            .filter(|g| !g.is_empty())
            .ok_or_else(|| ZsxqError::InvalidConfig("group id is required".to_string()))?;
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| ZsxqConfig::default().user_agent);
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        reqwest::Url::parse(&base_url)
            .map_err(|e| ZsxqError::InvalidUrl(format!("{base_url}: {e}")))?;

        let header = |value: String, name: &str| {
            HeaderValue::from_str(&value)
                .map_err(|_| ZsxqError::InvalidConfig(format!("{name} is not a valid header value")))
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            header(format!("zsxq_access_token={access_token}"), "access token")?,
        );
        headers.insert(USER_AGENT, header(user_agent, "user agent")?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::blocking::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ZsxqError::Network)?;

        Ok(ZsxqClient {
            client,
            base_url,
            group_id,
            backoff: self.backoff.unwrap_or_default(),
            request_delay: self.request_delay.unwrap_or(Duration::from_secs(2)),
        })
    }
}

/// Synchronous HTTP client for the topic API.
///
/// It should be constructed using `ZsxqClientBuilder`.
pub struct ZsxqClient {
    client: reqwest::blocking::Client,
    base_url: String,
    group_id: String,
    backoff: Backoff,
    request_delay: Duration,
}

impl ZsxqClient {
    /// Returns the base URL configured for this client.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the group this client reads from.
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ZsxqError> {
        let url = format!("{}{}", self.base_url, path);

        let result = retry_with_backoff(&self.backoff, || {
            debug!(%url, ?query, "GET");
            let response = self
                .client
                .get(&url)
                .query(query)
                .send()
                .map_err(ZsxqError::Network)?;

            let status = response.status();
            match status.as_u16() {
                401 => return Err(ZsxqError::Authentication),
                429 => return Err(ZsxqError::RateLimited),
                _ if !status.is_success() => {
                    return Err(ZsxqError::Http {
                        status: status.as_u16(),
                    });
                }
                _ => {}
            }

            let body: Value = response.json().map_err(ZsxqError::Network)?;
            check_envelope(body)
        });

        if !self.request_delay.is_zero() {
            thread::sleep(self.request_delay);
        }
        result
    }
}

impl TopicSource for ZsxqClient {
    fn validate_connection(&self) -> Result<(), ZsxqError> {
        self.get_page(&Feed::timeline(), 1, None).map(|_| ())
    }

    fn get_record(&self, id: &str) -> Result<Option<SourceRecord>, ZsxqError> {
        let data = self.get_json(&format!("/groups/{}/topics/{id}", self.group_id), &[])?;
        Ok(data
            .get("topic")
            .filter(|topic| topic.as_object().is_some_and(|t| !t.is_empty()))
            .cloned()
            .map(SourceRecord::new))
    }

    fn get_page(
        &self,
        feed: &Feed,
        count: usize,
        end_time: Option<&str>,
    ) -> Result<Vec<SourceRecord>, ZsxqError> {
        let mut query = vec![("count", count.clamp(1, MAX_PAGE_SIZE).to_string())];
        if let Some(scope) = feed.scope() {
            query.push(("scope", scope.to_string()));
        }
        if let Some(end_time) = end_time {
            query.push(("end_time", end_time.to_string()));
        }

        let data = self.get_json(&feed.path(&self.group_id), &query)?;
        let topics = match data.get("topics") {
            Some(Value::Array(items)) => items.iter().cloned().map(SourceRecord::new).collect(),
            _ => Vec::new(),
        };
        Ok(topics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn network_error() -> ZsxqError {
        ZsxqError::Network(
            reqwest::blocking::Client::new()
                .get("not-a-valid-url")
                .build()
                .unwrap_err(),
        )
    }

    #[test]
    fn http_error_display_includes_status() {
        let error_msg = ZsxqError::Http { status: 502 }.to_string();
        assert!(error_msg.contains("HTTP error"));
        assert!(error_msg.contains("502"));
    }

    #[test]
    fn envelope_returns_resp_data() {
        let data = check_envelope(json!({"succeeded": true, "resp_data": {"topics": []}})).unwrap();
        assert_eq!(data, json!({"topics": []}));
    }

    #[test]
    fn envelope_without_succeeded_is_accepted() {
        assert!(check_envelope(json!({"resp_data": {}})).is_ok());
    }

    #[test]
    fn envelope_code_401_is_authentication_error() {
        let err = check_envelope(json!({"succeeded": true, "code": 401})).unwrap_err();
        assert!(matches!(err, ZsxqError::Authentication));
    }

    #[test]
    fn envelope_failure_carries_message() {
        let err = check_envelope(json!({"succeeded": false, "code": 1059, "error": "busy"}))
            .unwrap_err();
        match err {
            ZsxqError::Api { code, message } => {
                assert_eq!(code, Some(1059));
                assert_eq!(message, "busy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn retry_succeeds_after_transient_network_error() {
        let attempts = AtomicUsize::new(0);
        let result = retry_with_backoff(&Backoff::immediate(5), || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 1 {
                Err(network_error())
            } else {
                Ok("success")
            }
        });

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn retry_stops_after_max_attempts() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), _> = retry_with_backoff(&Backoff::immediate(3), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(ZsxqError::RateLimited)
        });

        assert!(matches!(result, Err(ZsxqError::RateLimited)));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn retry_does_not_occur_on_authentication_or_4xx() {
        for error in [ZsxqError::Authentication, ZsxqError::Http { status: 404 }] {
            let attempts = AtomicUsize::new(0);
            let mut pending = Some(error);
            let result: Result<(), _> = retry_with_backoff(&Backoff::immediate(5), || {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(pending.take().unwrap_or(ZsxqError::RateLimited))
            });
            assert!(result.is_err());
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
        }
    }

    #[test]
    fn retry_occurs_on_http_5xx_errors() {
        let attempts = AtomicUsize::new(0);
        let result = retry_with_backoff(&Backoff::immediate(5), || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ZsxqError::Http { status: 503 })
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn backoff_delays_double_and_cap() {
        let backoff = Backoff {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(backoff.delay_for(0), Duration::from_secs(1));
        assert_eq!(backoff.delay_for(3), Duration::from_secs(8));
        assert_eq!(backoff.delay_for(10), Duration::from_secs(60));
    }

    #[test]
    fn builder_requires_token_and_group() {
        assert!(matches!(
            ZsxqClientBuilder::new().group_id("1").build(),
            Err(ZsxqError::InvalidConfig(_))
        ));
        assert!(matches!(
            ZsxqClientBuilder::new().access_token("t").build(),
            Err(ZsxqError::InvalidConfig(_))
        ));
    }

    #[test]
    fn builder_rejects_invalid_base_url() {
        let result = ZsxqClientBuilder::new()
            .access_token("t")
            .group_id("1")
            .base_url("not-a-valid-url")
            .build();
        assert!(matches!(result, Err(ZsxqError::InvalidUrl(_))));
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let client = ZsxqClientBuilder::new()
            .access_token("t")
            .group_id("1")
            .base_url("http://localhost:9000/v2/")
            .build()
            .unwrap();
        assert_eq!(client.base_url(), "http://localhost:9000/v2");
    }

    #[test]
    fn feeds_map_to_endpoints() {
        assert_eq!(Feed::timeline().path("9"), "/groups/9/topics");
        assert_eq!(Feed::Column("5".into()).path("9"), "/groups/9/columns/5/topics");
        assert_eq!(Feed::Hashtag("7".into()).path("9"), "/hashtags/7/topics");
        assert_eq!(
            Feed::Group {
                scope: Some("digests".into())
            }
            .scope(),
            Some("digests")
        );
    }

    /// Serves topics from a fixed list, newest first, honouring `end_time`.
    struct PagedSource {
        topics: Vec<SourceRecord>,
        calls: Mutex<Vec<(usize, Option<String>)>>,
    }

    impl PagedSource {
        fn new(count: usize) -> Self {
            let topics = (0..count)
                .map(|i| {
                    SourceRecord::new(json!({
                        "topic_id": (1000 - i).to_string(),
                        "create_time": format!("2024-01-{:02}T10:00:00.000+0800", 28 - i)
                    }))
                })
                .collect();
            Self {
                topics,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl TopicSource for PagedSource {
        fn validate_connection(&self) -> Result<(), ZsxqError> {
            Ok(())
        }

        fn get_record(&self, _id: &str) -> Result<Option<SourceRecord>, ZsxqError> {
            Ok(None)
        }

        fn get_page(
            &self,
            _feed: &Feed,
            count: usize,
            end_time: Option<&str>,
        ) -> Result<Vec<SourceRecord>, ZsxqError> {
            self.calls.lock().push((count, end_time.map(str::to_string)));
            Ok(self
                .topics
                .iter()
                .filter(|t| end_time.is_none_or(|end| t.created_at().unwrap_or("") < end))
                .take(count)
                .cloned()
                .collect())
        }
    }

    #[test]
    fn get_all_records_pages_until_short_page() {
        let source = PagedSource::new(7);
        let records = source
            .get_all_records(&Feed::timeline(), 3, None, None)
            .unwrap();

        assert_eq!(records.len(), 7);
        let calls = source.calls.lock();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1, None);
        assert_eq!(calls[1].1.as_deref(), Some("2024-01-26T10:00:00.000+0800"));
    }

    #[test]
    fn get_all_records_respects_max_items() {
        let source = PagedSource::new(10);
        let records = source
            .get_all_records(&Feed::timeline(), 4, None, Some(6))
            .unwrap();

        assert_eq!(records.len(), 6);
        let calls = source.calls.lock();
        assert_eq!(calls.iter().map(|c| c.0).collect::<Vec<_>>(), vec![4, 2]);
    }

    #[test]
    fn get_all_records_stops_at_start_time() {
        let source = PagedSource::new(10);
        let start = parse_timestamp("2024-01-25T10:00:00+08:00").unwrap();
        let records = source
            .get_all_records(&Feed::timeline(), 20, Some(start), None)
            .unwrap();

        let days: Vec<_> = records.iter().filter_map(|r| r.created_at()).collect();
        assert_eq!(days.len(), 3);
        assert!(days.iter().all(|d| *d > "2024-01-25T10:00:00.000+0800"));
    }
}
