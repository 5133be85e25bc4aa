use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::config::TransformConfig;
use crate::models::{ContentClass, SourceRecord};

use super::markup::decode_attribute;

static HASHTAG_ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<e type="hashtag"[^>]*title="([^"]*)"[^>]*/?>"#).expect("valid hashtag regex")
});

static HASHTAG_PLAIN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([^#\s]+)#").expect("valid hashtag regex"));

/// Tag added to every featured record.
pub const FEATURED_TAG: &str = "精华";

const SIZE_VARIANTS: [&str; 3] = ["large", "original", "thumbnail"];

/// Collects every image URL in a record, depth first.
///
/// At each object level the `images` array is read before the sibling
/// fields are visited. Duplicates are kept.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use zsxq_sync::processor::extract_images;
///
/// let record = json!({"talk": {"images": [{"large": {"url": "http://a/1.jpg"}}]}});
/// assert_eq!(extract_images(&record), vec!["http://a/1.jpg"]);
/// ```
pub fn extract_images(value: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    collect_images(value, &mut urls);
    urls
}

fn collect_images(value: &Value, urls: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Array(images)) = map.get("images") {
                urls.extend(images.iter().filter_map(image_url));
            }
            for (key, child) in map {
                if key != "images" && (child.is_object() || child.is_array()) {
                    collect_images(child, urls);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_images(item, urls);
            }
        }
        _ => {}
    }
}

/// URL of one `images` entry, preferring the largest size variant.
fn image_url(image: &Value) -> Option<String> {
    match image {
        Value::Object(map) => SIZE_VARIANTS
            .iter()
            .find_map(|size| map.get(*size)?.get("url")?.as_str())
            .or_else(|| map.get("url")?.as_str())
            .map(str::to_string),
        Value::String(url) if url.starts_with("http") => Some(url.clone()),
        _ => None,
    }
}

/// Extracts hashtags from both the element and the plain `#name#` form.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use zsxq_sync::models::SourceRecord;
/// use zsxq_sync::processor::extract_tags;
///
/// let record = SourceRecord::new(json!({"type": "talk", "talk": {"text": "#Python#Python#"}}));
/// assert_eq!(extract_tags(&record).len(), 1);
/// ```
pub fn extract_tags(record: &SourceRecord) -> BTreeSet<String> {
    let text = record.body_text();
    let mut tags = BTreeSet::new();

    for caps in HASHTAG_ELEMENT.captures_iter(text) {
        let decoded = decode_attribute(&caps[1]);
        let name = decoded.trim_matches('#');
        if !name.is_empty() {
            tags.insert(name.to_string());
        }
    }

    tags.extend(
        HASHTAG_PLAIN
            .captures_iter(text)
            .map(|caps| caps[1].to_string()),
    );

    if record.is_featured() {
        tags.insert(FEATURED_TAG.to_string());
    }

    tags
}

/// Derives destination categories; the result is never empty.
///
/// A column name (when column mapping is on) comes first, then the
/// featured and pinned labels. With none of those the class default is
/// used.
pub fn determine_categories(
    record: &SourceRecord,
    class: ContentClass,
    config: &TransformConfig,
) -> Vec<String> {
    let mut categories = Vec::new();

    if config.enable_column_mapping {
        if let Some(column) = record.column_name() {
            categories.push(column.to_string());
        }
    }
    if record.is_featured() && !config.featured_category.is_empty() {
        categories.push(config.featured_category.clone());
    }
    if record.is_pinned() && !config.pinned_category.is_empty() {
        categories.push(config.pinned_category.clone());
    }

    if categories.is_empty() {
        categories.push(config.title_settings(class).default_category.clone());
    }

    tracing::debug!(%class, ?categories, "Resolved categories");
    categories
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefers_large_then_original_then_thumbnail() {
        let record = json!({"images": [
            {"thumbnail": {"url": "t1"}, "large": {"url": "l1"}},
            {"thumbnail": {"url": "t2"}, "original": {"url": "o2"}},
            {"thumbnail": {"url": "t3"}},
            {"url": "u4"},
            "https://bare/5.png",
            "not-a-url",
            42
        ]});
        assert_eq!(
            extract_images(&record),
            vec!["l1", "o2", "t3", "u4", "https://bare/5.png"]
        );
    }

    #[test]
    fn finds_deeply_nested_images_in_traversal_order() {
        let record = json!({
            "images": [{"url": "top"}],
            "talk": {
                "owner": {"name": "x"},
                "article": {"images": [{"original": {"url": "http://a/x.jpg"}}]}
            },
            "comments": [
                {"meta": {"attachments": {"images": ["http://c/deep.gif"]}}}
            ]
        });
        assert_eq!(
            extract_images(&record),
            vec!["top", "http://a/x.jpg", "http://c/deep.gif"]
        );
    }

    #[test]
    fn keeps_duplicates() {
        let record = json!({
            "talk": {"images": [{"url": "same"}]},
            "_full_article": {"images": [{"url": "same"}]}
        });
        assert_eq!(extract_images(&record), vec!["same", "same"]);
    }

    #[test]
    fn no_images_yields_empty_list() {
        assert!(extract_images(&json!({"talk": {"text": "x"}})).is_empty());
        assert!(extract_images(&json!("scalar")).is_empty());
    }

    #[test]
    fn tags_come_from_both_encodings() {
        let record = SourceRecord::new(json!({
            "type": "talk",
            "talk": {"text": "<e type=\"hashtag\" hid=\"1\" title=\"%23Rust%23\" /> 还有 #工具# 和 #工具#"}
        }));
        let tags = extract_tags(&record);
        assert_eq!(
            tags,
            ["Rust", "工具"]
                .iter()
                .map(|s| s.to_string())
                .collect::<BTreeSet<_>>()
        );
    }

    #[test]
    fn featured_records_get_featured_tag() {
        let record = SourceRecord::new(json!({
            "type": "talk",
            "digested": true,
            "talk": {"text": "无标签"}
        }));
        assert!(extract_tags(&record).contains(FEATURED_TAG));
    }

    #[test]
    fn column_name_requires_mapping_enabled() {
        let record = SourceRecord::new(json!({"type": "talk", "_column_name": "Rust 专栏"}));
        let mut config = TransformConfig::default();

        assert_eq!(
            determine_categories(&record, ContentClass::ShortForm, &config),
            vec!["Trending"]
        );

        config.enable_column_mapping = true;
        assert_eq!(
            determine_categories(&record, ContentClass::ShortForm, &config),
            vec!["Rust 专栏"]
        );
    }

    #[test]
    fn special_labels_are_appended() {
        let record = SourceRecord::new(json!({
            "type": "talk",
            "_column_name": "专栏",
            "digested": true,
            "sticky": true
        }));
        let mut config = TransformConfig::default();
        config.enable_column_mapping = true;

        assert_eq!(
            determine_categories(&record, ContentClass::Article, &config),
            vec!["专栏", "精华", "置顶"]
        );
    }

    #[test]
    fn defaults_differ_per_class() {
        let record = SourceRecord::new(json!({"type": "talk"}));
        let mut config = TransformConfig::default();
        config.article.default_category = "文章".to_string();
        config.short_form.default_category = "主题".to_string();

        assert_eq!(
            determine_categories(&record, ContentClass::Article, &config),
            vec!["文章"]
        );
        assert_eq!(
            determine_categories(&record, ContentClass::ShortForm, &config),
            vec!["主题"]
        );
    }

    #[test]
    fn categories_are_never_empty() {
        let mut config = TransformConfig::default();
        config.featured_category.clear();
        config.pinned_category.clear();
        for value in [json!({}), json!({"digested": true, "sticky": true}), json!(null)] {
            let record = SourceRecord::new(value);
            for class in [ContentClass::Article, ContentClass::ShortForm] {
                assert!(!determine_categories(&record, class, &config).is_empty());
            }
        }
    }
}
