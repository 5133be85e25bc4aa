/// WordPress XML-RPC client implementation.
///
/// This module provides `WordPressClient` for publishing posts over
/// XML-RPC, and the `Publisher` trait the orchestrator consumes.
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::WordPressConfig;

use super::xmlrpc::{XmlRpcError, XmlRpcValue, decode_response, encode_call};

/// Title prefix for short posts published as standard posts.
pub const FALLBACK_TITLE_PREFIX: &str = "[片刻]";

/// Tag added to short posts published as standard posts.
pub const FALLBACK_TAG: &str = "片刻";

/// Post type understood by every WordPress install.
pub const STANDARD_POST_TYPE: &str = "post";

const RECENT_POSTS_SCANNED: i64 = 100;

/// Errors that can occur when publishing to WordPress.
#[derive(Debug, Error)]
pub enum WordPressError {
    /// Network-related errors (connection failures, TLS, timeouts)
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// HTTP errors with status code
    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    /// Username or password rejected
    #[error("WordPress authentication failed: check username and password")]
    Authentication,

    /// Protocol-level failure, including server faults
    #[error("XML-RPC error: {0}")]
    XmlRpc(#[from] XmlRpcError),

    /// A response that decoded but did not have the expected shape
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Invalid URL configuration error
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// A post ready to be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub post_type: String,
    /// Recorded on the post as the `zsxq_topic_id` custom field.
    pub source_id: String,
}

impl PostDraft {
    /// The standard-post form of a short post whose custom type was refused.
    pub fn as_standard_fallback(&self) -> Self {
        let mut tags = self.tags.clone();
        if !tags.iter().any(|t| t == FALLBACK_TAG) {
            tags.push(FALLBACK_TAG.to_string());
        }
        let categories = if self.categories.is_empty() {
            vec![FALLBACK_TAG.to_string()]
        } else {
            self.categories.clone()
        };

        Self {
            title: format!("{FALLBACK_TITLE_PREFIX} {}", self.title),
            content: format!(r#"<div class="moment-content">{}</div>"#, self.content),
            categories,
            tags,
            post_type: STANDARD_POST_TYPE.to_string(),
            source_id: self.source_id.clone(),
        }
    }

    /// The `wp.newPost` content struct.
    fn to_content(&self) -> XmlRpcValue {
        let mut terms = Vec::new();
        if !self.categories.is_empty() {
            terms.push(("category", XmlRpcValue::strings(&self.categories)));
        }
        if !self.tags.is_empty() {
            terms.push(("post_tag", XmlRpcValue::strings(&self.tags)));
        }

        let field = |key: &str, value: &str| {
            XmlRpcValue::structure([("key", XmlRpcValue::from(key)), ("value", XmlRpcValue::from(value))])
        };
        let custom_fields = XmlRpcValue::Array(vec![
            field("content_source", "zsxq"),
            field("content_source_type", self.post_type.as_str()),
            field("zsxq_topic_id", self.source_id.as_str()),
        ]);

        let mut members = vec![
            ("post_type", XmlRpcValue::from(self.post_type.as_str())),
            ("post_status", XmlRpcValue::from("publish")),
            ("post_title", XmlRpcValue::from(self.title.as_str())),
            ("post_content", XmlRpcValue::from(self.content.as_str())),
            ("comment_status", XmlRpcValue::from("open")),
            ("custom_fields", custom_fields),
        ];
        if !terms.is_empty() {
            members.push(("terms_names", XmlRpcValue::structure(terms)));
        }
        XmlRpcValue::structure(members)
    }
}

/// Trait for publishing operations.
///
/// This trait enables mocking in tests and provides a clean interface for
/// the orchestrator.
pub trait Publisher: Send + Sync {
    /// Checks that the endpoint is reachable and the credentials work.
    fn validate_connection(&self) -> Result<(), WordPressError>;

    /// Publishes a post, returning its remote id.
    fn create_post(&self, draft: &PostDraft) -> Result<String, WordPressError>;

    /// Whether a recent post already carries this exact title.
    ///
    /// Lookup failures are treated as "absent".
    fn post_exists(&self, title: &str) -> bool;
}

/// Derives the XML-RPC endpoint from a site or endpoint URL.
///
/// # Examples
///
/// ```
/// use zsxq_sync::wordpress::xmlrpc_endpoint;
///
/// assert_eq!(xmlrpc_endpoint("https://blog.example.com/"), "https://blog.example.com/xmlrpc.php");
/// assert_eq!(xmlrpc_endpoint("https://blog.example.com/xmlrpc.php"), "https://blog.example.com/xmlrpc.php");
/// ```
pub fn xmlrpc_endpoint(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.ends_with(".php") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/xmlrpc.php")
    }
}

/// Builder for constructing `WordPressClient` instances.
#[derive(Debug, Default)]
pub struct WordPressClientBuilder {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    verify_ssl: Option<bool>,
}

impl WordPressClientBuilder {
    /// Creates a new `WordPressClientBuilder` with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a builder from the `wordpress` config section.
    pub fn from_config(config: &WordPressConfig) -> Self {
        Self::new()
            .url(&config.url)
            .username(&config.username)
            .password(&config.password)
            .verify_ssl(config.verify_ssl)
    }

    /// Site URL or XML-RPC endpoint.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Disables certificate verification when `false`.
    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = Some(verify);
        self
    }

    /// Builds the `WordPressClient`.
    ///
    /// Returns `InvalidUrl` when the URL is missing or unparseable.
    pub fn build(self) -> Result<WordPressClient, WordPressError> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| WordPressError::InvalidUrl("WordPress URL is required".to_string()))?;
        let endpoint = xmlrpc_endpoint(&url);
        reqwest::Url::parse(&endpoint)
            .map_err(|e| WordPressError::InvalidUrl(format!("{endpoint}: {e}")))?;

        let verify_ssl = self.verify_ssl.unwrap_or(true);
        if !verify_ssl {
            warn!("TLS certificate verification is disabled for WordPress");
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(!verify_ssl)
            .build()
            .map_err(WordPressError::Network)?;

        Ok(WordPressClient {
            client,
            endpoint,
            username: self.username.unwrap_or_default(),
            password: self.password.unwrap_or_default(),
        })
    }
}

/// Synchronous XML-RPC client for one WordPress site.
pub struct WordPressClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl WordPressClient {
    /// Returns the XML-RPC endpoint this client posts to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Calls a `wp.*` method; blog id and credentials are prepended.
    fn call(&self, method: &str, args: Vec<XmlRpcValue>) -> Result<XmlRpcValue, WordPressError> {
        let mut params = vec![
            XmlRpcValue::Int(0),
            XmlRpcValue::from(self.username.as_str()),
            XmlRpcValue::from(self.password.as_str()),
        ];
        params.extend(args);

        debug!(method, "XML-RPC call");
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(encode_call(method, &params))
            .send()
            .map_err(WordPressError::Network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(WordPressError::Http {
                status: status.as_u16(),
            });
        }

        let body = response.text().map_err(WordPressError::Network)?;
        decode_response(&body).map_err(|e| match e {
            XmlRpcError::Fault { code: 403, .. } => WordPressError::Authentication,
            other => WordPressError::XmlRpc(other),
        })
    }

    fn new_post(&self, draft: &PostDraft) -> Result<String, WordPressError> {
        let result = self.call("wp.newPost", vec![draft.to_content()])?;
        match result {
            XmlRpcValue::String(id) => Ok(id),
            XmlRpcValue::Int(id) => Ok(id.to_string()),
            other => Err(WordPressError::UnexpectedResponse(format!(
                "wp.newPost returned {other:?}"
            ))),
        }
    }

    fn recent_titles(&self) -> Result<Vec<String>, WordPressError> {
        let filter = XmlRpcValue::structure([
            (
                "post_status",
                XmlRpcValue::strings(&["publish", "draft", "private"]),
            ),
            ("number", XmlRpcValue::Int(RECENT_POSTS_SCANNED)),
            ("orderby", XmlRpcValue::from("date")),
            ("order", XmlRpcValue::from("DESC")),
        ]);
        let fields = XmlRpcValue::strings(&["post_title"]);

        let result = self.call("wp.getPosts", vec![filter, fields])?;
        let posts = result.as_array().ok_or_else(|| {
            WordPressError::UnexpectedResponse("wp.getPosts did not return an array".to_string())
        })?;
        Ok(posts
            .iter()
            .filter_map(|p| p.get("post_title").and_then(XmlRpcValue::as_str))
            .map(str::to_string)
            .collect())
    }
}

impl Publisher for WordPressClient {
    fn validate_connection(&self) -> Result<(), WordPressError> {
        let filter = XmlRpcValue::structure([("number", XmlRpcValue::Int(1))]);
        self.call("wp.getPosts", vec![filter])?;
        info!(endpoint = %self.endpoint, "Connected to WordPress");
        Ok(())
    }

    fn create_post(&self, draft: &PostDraft) -> Result<String, WordPressError> {
        match self.new_post(draft) {
            Ok(id) => {
                info!(title = %draft.title, post_id = %id, post_type = %draft.post_type, "Created post");
                Ok(id)
            }
            Err(WordPressError::Authentication) => Err(WordPressError::Authentication),
            Err(e) if draft.post_type != STANDARD_POST_TYPE => {
                warn!(error = %e, post_type = %draft.post_type, "Custom post type refused, publishing as standard post");
                let fallback = draft.as_standard_fallback();
                let id = self.new_post(&fallback)?;
                info!(title = %fallback.title, post_id = %id, "Created post");
                Ok(id)
            }
            Err(e) => Err(e),
        }
    }

    fn post_exists(&self, title: &str) -> bool {
        match self.recent_titles() {
            Ok(titles) => {
                let exists = titles.iter().any(|t| t == title);
                if exists {
                    info!(%title, "Found existing post with the same title");
                }
                exists
            }
            Err(e) => {
                error!(error = %e, "Failed to check for existing post");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> PostDraft {
        PostDraft {
            title: "今天天气不错".to_string(),
            content: "<p>正文</p>".to_string(),
            categories: vec![],
            tags: vec!["生活".to_string()],
            post_type: "moment".to_string(),
            source_id: "42".to_string(),
        }
    }

    #[test]
    fn endpoint_is_derived_from_site_url() {
        assert_eq!(xmlrpc_endpoint("https://a.com"), "https://a.com/xmlrpc.php");
        assert_eq!(xmlrpc_endpoint(" https://a.com/blog/ "), "https://a.com/blog/xmlrpc.php");
        assert_eq!(
            xmlrpc_endpoint("https://a.com/custom-rpc.php"),
            "https://a.com/custom-rpc.php"
        );
    }

    #[test]
    fn builder_rejects_missing_or_invalid_url() {
        assert!(matches!(
            WordPressClientBuilder::new().build(),
            Err(WordPressError::InvalidUrl(_))
        ));
        assert!(matches!(
            WordPressClientBuilder::new().url("not a url").build(),
            Err(WordPressError::InvalidUrl(_))
        ));
    }

    #[test]
    fn builder_accepts_disabled_verification() {
        let client = WordPressClientBuilder::new()
            .url("https://blog.example.com")
            .username("me")
            .password("pw")
            .verify_ssl(false)
            .build()
            .unwrap();
        assert_eq!(client.endpoint(), "https://blog.example.com/xmlrpc.php");
    }

    #[test]
    fn fallback_marks_title_body_and_tags() {
        let fallback = draft().as_standard_fallback();

        assert_eq!(fallback.title, "[片刻] 今天天气不错");
        assert_eq!(fallback.content, r#"<div class="moment-content"><p>正文</p></div>"#);
        assert_eq!(fallback.tags, vec!["生活".to_string(), "片刻".to_string()]);
        assert_eq!(fallback.categories, vec!["片刻".to_string()]);
        assert_eq!(fallback.post_type, "post");
        assert_eq!(fallback.source_id, "42");
    }

    #[test]
    fn fallback_does_not_duplicate_tag() {
        let mut d = draft();
        d.tags.push("片刻".to_string());
        d.categories.push("Trending".to_string());
        let fallback = d.as_standard_fallback();
        assert_eq!(fallback.tags.iter().filter(|t| *t == "片刻").count(), 1);
        assert_eq!(fallback.categories, vec!["Trending".to_string()]);
    }

    #[test]
    fn content_struct_carries_terms_and_source() {
        let mut d = draft();
        d.categories.push("Trending".to_string());
        let content = d.to_content();

        assert_eq!(content.get("post_type").and_then(XmlRpcValue::as_str), Some("moment"));
        assert_eq!(content.get("post_status").and_then(XmlRpcValue::as_str), Some("publish"));
        let terms = content.get("terms_names").unwrap();
        assert_eq!(terms.get("category"), Some(&XmlRpcValue::strings(&["Trending"])));
        assert_eq!(terms.get("post_tag"), Some(&XmlRpcValue::strings(&["生活"])));

        let fields = content.get("custom_fields").and_then(XmlRpcValue::as_array).unwrap();
        assert!(fields.iter().any(|f| {
            f.get("key").and_then(XmlRpcValue::as_str) == Some("zsxq_topic_id")
                && f.get("value").and_then(XmlRpcValue::as_str) == Some("42")
        }));
    }

    #[test]
    fn content_struct_omits_empty_terms() {
        let mut d = draft();
        d.tags.clear();
        assert!(d.to_content().get("terms_names").is_none());
    }
}
