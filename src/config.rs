//! Configuration loading, environment overrides and validation.
//!
//! The on-disk format is a single JSON document with one section per
//! collaborator. Credentials may be supplied (or replaced) through environment
//! variables so the file can be committed without secrets.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::models::ContentClass;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const DEFAULT_CATEGORY: &str = "Trending";
const DEFAULT_PLACEHOLDER_TITLE: &str = "无标题";
const DEFAULT_TOPIC_PREFIX: &str = "[主题]";
const DEFAULT_TOPIC_TITLE_LENGTH: usize = 30;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read configuration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed configuration: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Missing required configuration value: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration value: {0}")]
    Invalid(String),
}

/// Complete application configuration as stored in `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub zsxq: ZsxqConfig,
    pub wordpress: WordPressConfig,
    pub qiniu: QiniuConfig,
    pub sync: SyncConfig,
    pub source: SourceConfig,
    pub content_mapping: ContentMapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZsxqConfig {
    pub access_token: String,
    pub user_agent: String,
    pub group_id: String,
}

impl Default for ZsxqConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            group_id: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordPressConfig {
    /// XML-RPC endpoint, e.g. `https://blog.example.com/xmlrpc.php`.
    pub url: String,
    pub username: String,
    pub password: String,
    pub verify_ssl: bool,
}

impl Default for WordPressConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            verify_ssl: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QiniuConfig {
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub delay_seconds: u64,
    pub max_retries: u32,
    /// Legacy global title switch, used when a type has no `sync_title`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_title: Option<bool>,
    pub add_source_footer: bool,
    pub fetch_article_details: bool,
    pub detail_fetch_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            delay_seconds: 2,
            max_retries: 5,
            sync_title: None,
            add_source_footer: true,
            fetch_article_details: true,
            detail_fetch_retries: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: "知识星球".to_string(),
            url: String::new(),
        }
    }
}

/// Per-type settings for articles or short-form topics.
///
/// Every field is optional so that each type can apply its own defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_title: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub placeholder_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_title_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_classification: Option<String>,
    /// Older name for `default_classification`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_custom_post_type: Option<bool>,
}

impl TypeSettings {
    /// Resolves the default category through the alias chain.
    pub fn default_category(&self) -> &str {
        self.default_classification
            .as_deref()
            .or(self.category.as_deref())
            .unwrap_or(DEFAULT_CATEGORY)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialCategories {
    pub digested: String,
    pub sticky: String,
}

impl Default for SpecialCategories {
    fn default() -> Self {
        Self {
            digested: "精华".to_string(),
            sticky: "置顶".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostTypes {
    pub article: String,
    pub topic: String,
}

impl Default for PostTypes {
    fn default() -> Self {
        Self {
            article: "post".to_string(),
            topic: "moment".to_string(),
        }
    }
}

/// Kind of feed a sync target pulls from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTargetKind {
    /// Group timeline filtered by scope (`all`, `digests`, ...).
    Scope,
    Column,
    Hashtag,
}

/// One feed to synchronize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTarget {
    #[serde(rename = "type")]
    pub kind: SyncTargetKind,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Replaces the computed categories of every topic from this target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_override: Option<String>,
}

impl SyncTarget {
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            let kind = serde_json::to_value(self.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("{kind}:{}", self.value)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentMapping {
    pub article_settings: TypeSettings,
    pub topic_settings: TypeSettings,
    pub enable_column_mapping: bool,
    pub special_categories: SpecialCategories,
    pub post_types: PostTypes,
    pub sync_targets: Vec<SyncTarget>,
}

impl AppConfig {
    /// Loads, overrides from the environment and validates a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a config file without overrides or validation.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(ConfigError::Parse)
    }

    /// Applies overrides from process environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let overrides: [(&str, &mut String); 9] = [
            ("ZSXQ_ACCESS_TOKEN", &mut self.zsxq.access_token),
            ("ZSXQ_GROUP_ID", &mut self.zsxq.group_id),
            ("WORDPRESS_URL", &mut self.wordpress.url),
            ("WORDPRESS_USERNAME", &mut self.wordpress.username),
            ("WORDPRESS_PASSWORD", &mut self.wordpress.password),
            ("QINIU_ACCESS_KEY", &mut self.qiniu.access_key),
            ("QINIU_SECRET_KEY", &mut self.qiniu.secret_key),
            ("QINIU_BUCKET", &mut self.qiniu.bucket),
            ("QINIU_DOMAIN", &mut self.qiniu.domain),
        ];
        for (key, slot) in overrides {
            if let Some(value) = lookup(key) {
                info!("Using environment variable {key}");
                *slot = value;
            }
        }

        if let Some(value) = lookup("WORDPRESS_VERIFY_SSL") {
            let value = value.to_lowercase();
            self.wordpress.verify_ssl = !matches!(value.as_str(), "false" | "0" | "no");
            info!("Using environment variable WORDPRESS_VERIFY_SSL: {value}");
        }
    }

    /// Checks that every required value is present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.zsxq.access_token, "zsxq.access_token"),
            (&self.zsxq.group_id, "zsxq.group_id"),
            (&self.zsxq.user_agent, "zsxq.user_agent"),
            (&self.wordpress.url, "wordpress.url"),
            (&self.wordpress.username, "wordpress.username"),
            (&self.wordpress.password, "wordpress.password"),
        ];
        for (value, name) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(name));
            }
        }

        if self.sync.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "sync.batch_size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether all four Qiniu credentials are present.
    pub fn has_qiniu(&self) -> bool {
        [
            &self.qiniu.access_key,
            &self.qiniu.secret_key,
            &self.qiniu.bucket,
            &self.qiniu.domain,
        ]
        .iter()
        .all(|v| !v.is_empty())
    }

    /// Returns the enabled sync targets.
    pub fn enabled_targets(&self) -> Vec<&SyncTarget> {
        self.content_mapping
            .sync_targets
            .iter()
            .filter(|t| t.enabled)
            .collect()
    }

    /// Template written by `init`: empty credentials, every knob spelled out.
    pub fn template() -> Self {
        let mut config = Self::default();
        config.content_mapping.enable_column_mapping = true;
        config.content_mapping.article_settings = TypeSettings {
            sync_title: Some(true),
            placeholder_title: Some(DEFAULT_PLACEHOLDER_TITLE.to_string()),
            default_classification: Some("文章".to_string()),
            ..TypeSettings::default()
        };
        config.content_mapping.topic_settings = TypeSettings {
            sync_title: Some(true),
            placeholder_title: Some(DEFAULT_PLACEHOLDER_TITLE.to_string()),
            max_title_length: Some(DEFAULT_TOPIC_TITLE_LENGTH),
            title_prefix: Some(DEFAULT_TOPIC_PREFIX.to_string()),
            default_classification: Some("主题".to_string()),
            use_custom_post_type: Some(true),
            ..TypeSettings::default()
        };
        config.content_mapping.sync_targets = vec![SyncTarget {
            kind: SyncTargetKind::Scope,
            value: "all".to_string(),
            name: Some("All topics".to_string()),
            enabled: true,
            category_override: None,
        }];
        config
    }
}

/// Title settings for one content class, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleSettings {
    pub sync_title: bool,
    pub placeholder_title: String,
    pub max_title_length: usize,
    pub title_prefix: String,
    pub default_category: String,
}

impl TitleSettings {
    fn resolve(settings: &TypeSettings, legacy_sync_title: Option<bool>, prefix: &str) -> Self {
        Self {
            sync_title: settings.sync_title.or(legacy_sync_title).unwrap_or(true),
            placeholder_title: settings
                .placeholder_title
                .clone()
                .unwrap_or_else(|| DEFAULT_PLACEHOLDER_TITLE.to_string()),
            max_title_length: settings
                .max_title_length
                .unwrap_or(DEFAULT_TOPIC_TITLE_LENGTH),
            title_prefix: settings
                .title_prefix
                .clone()
                .unwrap_or_else(|| prefix.to_string()),
            default_category: settings.default_category().to_string(),
        }
    }
}

/// Immutable settings consumed by the transformation core.
///
/// Resolved once per run from [`AppConfig`] and passed by reference, so the
/// core never consults ambient state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
    pub article: TitleSettings,
    pub short_form: TitleSettings,
    pub enable_column_mapping: bool,
    pub featured_category: String,
    pub pinned_category: String,
    pub article_post_type: String,
    pub short_form_post_type: String,
    pub add_source_footer: bool,
    pub source_name: String,
    pub source_url: String,
}

impl TransformConfig {
    pub fn title_settings(&self, class: ContentClass) -> &TitleSettings {
        match class {
            ContentClass::Article => &self.article,
            ContentClass::ShortForm => &self.short_form,
        }
    }

    pub fn post_type(&self, class: ContentClass) -> &str {
        match class {
            ContentClass::Article => &self.article_post_type,
            ContentClass::ShortForm => &self.short_form_post_type,
        }
    }
}

impl From<&AppConfig> for TransformConfig {
    fn from(config: &AppConfig) -> Self {
        let mapping = &config.content_mapping;
        let legacy = config.sync.sync_title;
        let short_form_post_type = if mapping.topic_settings.use_custom_post_type.unwrap_or(true) {
            mapping.post_types.topic.clone()
        } else {
            "post".to_string()
        };

        Self {
            article: TitleSettings::resolve(&mapping.article_settings, legacy, ""),
            short_form: TitleSettings::resolve(
                &mapping.topic_settings,
                legacy,
                DEFAULT_TOPIC_PREFIX,
            ),
            enable_column_mapping: mapping.enable_column_mapping,
            featured_category: mapping.special_categories.digested.clone(),
            pinned_category: mapping.special_categories.sticky.clone(),
            article_post_type: mapping.post_types.article.clone(),
            short_form_post_type,
            add_source_footer: config.sync.add_source_footer,
            source_name: config.source.name.clone(),
            source_url: config.source.url.clone(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}
