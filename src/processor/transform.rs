use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::TransformConfig;
use crate::models::{ContentClass, OutputRecord, SourceRecord};

use super::classify::classify;
use super::dedupe::remove_leading_duplicate;
use super::extract::{determine_categories, extract_images, extract_tags};
use super::markup::{normalize_article, normalize_short_form};
use super::timestamp::{format_footer_time, parse_timestamp};
use super::title::{SynthesizedTitle, synthesize_title};

/// Alt text of relayed images appended to a post.
const IMAGE_ALT: &str = "图片";

/// Errors that make a record impossible to transform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("Source record is not a JSON object")]
    NotAnObject,

    #[error("Source record has no topic_id")]
    MissingId,
}

/// Transforms one source record into a publishable post.
///
/// Pure: the same record and configuration always give the same output.
/// A malformed `created_at` is recovered from with the placeholder title.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use zsxq_sync::config::TransformConfig;
/// use zsxq_sync::models::{ContentClass, SourceRecord};
/// use zsxq_sync::processor::transform;
///
/// let record = SourceRecord::new(json!({
///     "topic_id": 1,
///     "type": "q&a-question",
///     "question": {"text": "如何提升开发效率\n\n先写测试。"}
/// }));
/// let post = transform(&record, &TransformConfig::default()).unwrap();
///
/// assert_eq!(post.content_class, ContentClass::Article);
/// assert_eq!(post.title, "如何提升开发效率");
/// assert_eq!(post.body_html, "<p>先写测试。</p>");
/// ```
pub fn transform(
    record: &SourceRecord,
    config: &TransformConfig,
) -> Result<OutputRecord, TransformError> {
    if !record.is_object() {
        return Err(TransformError::NotAnObject);
    }
    let source_id = record.id().ok_or(TransformError::MissingId)?;

    let class = classify(record);
    let settings = config.title_settings(class);
    let title_sync_disabled = !settings.sync_title;

    let synthesized = if title_sync_disabled {
        SynthesizedTitle {
            title: settings.placeholder_title.clone(),
            source_line: None,
        }
    } else {
        synthesize_title(record, class, settings).unwrap_or_else(|err| {
            warn!(%source_id, error = %err, "Falling back to placeholder title");
            SynthesizedTitle {
                title: settings.placeholder_title.clone(),
                source_line: None,
            }
        })
    };

    let text = record.body_text();
    let body_html = match class {
        ContentClass::Article if title_sync_disabled => normalize_article(text),
        ContentClass::Article => normalize_article(&remove_leading_duplicate(
            text,
            &synthesized.title,
            synthesized.source_line.as_deref(),
        )),
        ContentClass::ShortForm => normalize_short_form(text),
    };

    let title = if synthesized.title.trim().is_empty() {
        " ".to_string()
    } else {
        synthesized.title
    };

    debug!(%source_id, %class, %title, "Transformed record");

    Ok(OutputRecord {
        source_id,
        title,
        body_html,
        image_urls: extract_images(record.raw()),
        tags: extract_tags(record),
        categories: determine_categories(record, class, config),
        is_featured: record.is_featured(),
        content_class: class,
        created_at: record.created_at().map(str::to_string),
        post_type: config.post_type(class).to_string(),
        title_sync_disabled,
    })
}

/// Builds the final post body: the transformed HTML, each image (rewritten
/// through `url_map` when relayed) in its own paragraph, then the source
/// attribution footer when enabled.
pub fn finalize_body(
    output: &OutputRecord,
    url_map: &HashMap<String, String>,
    config: &TransformConfig,
) -> String {
    let mut blocks = Vec::new();
    if !output.body_html.is_empty() {
        blocks.push(output.body_html.clone());
    }

    if !output.image_urls.is_empty() {
        let images = output
            .image_urls
            .iter()
            .map(|original| {
                let url = url_map.get(original).unwrap_or(original);
                format!(
                    r#"<img src="{}" alt="{IMAGE_ALT}">"#,
                    html_escape::encode_double_quoted_attribute(url)
                )
            })
            .collect::<Vec<_>>();
        blocks.push(format!("<p>{}</p>", images.join("</p>\n\n<p>")));
    }

    if config.add_source_footer {
        if let Some(created_at) = output.created_at.as_deref() {
            blocks.push(source_footer(&output.source_id.to_string(), created_at, config));
        }
    }

    blocks.join("\n\n")
}

fn source_footer(source_id: &str, created_at: &str, config: &TransformConfig) -> String {
    let source = if config.source_url.is_empty() {
        html_escape::encode_text(&config.source_name).into_owned()
    } else {
        format!(
            r#"<a href="{}" target="_blank">{}</a>"#,
            html_escape::encode_double_quoted_attribute(&config.source_url),
            html_escape::encode_text(&config.source_name)
        )
    };

    match parse_timestamp(created_at) {
        Ok(dt) => format!(
            r#"<p class="post-meta">—— 发布于 {source} {}</p>"#,
            format_footer_time(&dt)
        ),
        Err(err) => {
            warn!(source_id, error = %err, "Writing footer without publish time");
            format!(r#"<p class="post-meta">—— 发布于 {source}</p>"#)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> SourceRecord {
        SourceRecord::new(value)
    }

    #[test]
    fn rejects_non_objects_and_missing_ids() {
        let config = TransformConfig::default();
        assert_eq!(
            transform(&record(json!([1, 2])), &config),
            Err(TransformError::NotAnObject)
        );
        assert_eq!(
            transform(&record(json!({"type": "talk"})), &config),
            Err(TransformError::MissingId)
        );
    }

    #[test]
    fn short_form_record_uses_prefix_and_custom_post_type() {
        let post = transform(
            &record(json!({
                "topic_id": "7",
                "type": "talk",
                "talk": {"text": "今天天气不错\n适合写代码"}
            })),
            &TransformConfig::default(),
        )
        .unwrap();

        assert_eq!(post.content_class, ContentClass::ShortForm);
        assert_eq!(post.title, "[主题] 今天天气不错 适合写代码");
        assert_eq!(post.body_html, "<p>今天天气不错<br>适合写代码</p>");
        assert_eq!(post.post_type, "moment");
    }

    #[test]
    fn disabled_title_sync_uses_placeholder_and_keeps_body() {
        let mut config = TransformConfig::default();
        config.article.sync_title = false;
        config.article.placeholder_title = "占位".to_string();

        let post = transform(
            &record(json!({
                "topic_id": "8",
                "type": "article",
                "content": {"text": "第一行\n第二行"}
            })),
            &config,
        )
        .unwrap();

        assert_eq!(post.title, "占位");
        assert!(post.title_sync_disabled);
        assert_eq!(post.body_html, "<p>第一行<br>\n第二行</p>");
    }

    #[test]
    fn empty_placeholder_becomes_single_space() {
        let mut config = TransformConfig::default();
        config.short_form.sync_title = false;
        config.short_form.placeholder_title = String::new();

        let post = transform(&record(json!({"topic_id": "9", "type": "talk"})), &config).unwrap();
        assert_eq!(post.title, " ");
    }

    #[test]
    fn malformed_timestamp_falls_back_to_placeholder() {
        let post = transform(
            &record(json!({
                "topic_id": "10",
                "type": "article",
                "content": {"text": ""},
                "create_time": "not-a-time"
            })),
            &TransformConfig::default(),
        )
        .unwrap();
        assert_eq!(post.title, "无标题");
    }

    fn output_with_images() -> OutputRecord {
        transform(
            &record(json!({
                "topic_id": "11",
                "type": "talk",
                "talk": {"text": "配图", "images": [{"large": {"url": "http://a/1.jpg"}}, {"url": "http://a/2.jpg"}]},
                "create_time": "2024-01-15T10:30:00.000+0800"
            })),
            &TransformConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn finalize_rewrites_relayed_images_and_appends_footer() {
        let output = output_with_images();
        let mut config = TransformConfig::default();
        config.source_url = "https://wx.zsxq.com/group/1".to_string();
        let url_map = HashMap::from([(
            "http://a/1.jpg".to_string(),
            "https://cdn.example.com/abc.jpg".to_string(),
        )]);

        let body = finalize_body(&output, &url_map, &config);

        assert_eq!(
            body,
            concat!(
                "<p>配图</p>\n\n",
                "<p><img src=\"https://cdn.example.com/abc.jpg\" alt=\"图片\"></p>\n\n",
                "<p><img src=\"http://a/2.jpg\" alt=\"图片\"></p>\n\n",
                "<p class=\"post-meta\">—— 发布于 <a href=\"https://wx.zsxq.com/group/1\" target=\"_blank\">知识星球</a> 2024-01-15 10:30:00</p>"
            )
        );
    }

    #[test]
    fn finalize_without_footer_or_images() {
        let mut output = output_with_images();
        output.image_urls.clear();
        let mut config = TransformConfig::default();
        config.add_source_footer = false;

        assert_eq!(finalize_body(&output, &HashMap::new(), &config), "<p>配图</p>");
    }

    #[test]
    fn finalize_footer_survives_bad_timestamp() {
        let mut output = output_with_images();
        output.image_urls.clear();
        output.created_at = Some("bogus".to_string());

        let body = finalize_body(&output, &HashMap::new(), &TransformConfig::default());
        assert!(body.ends_with("<p class=\"post-meta\">—— 发布于 知识星球</p>"));
    }
}
