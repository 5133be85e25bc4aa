//! Conversion of the platform's inline `<e .../>` markup into HTML.
//!
//! The source embeds rich text as `<e type="..." .../>` elements (or, for
//! older mentions, `<e type="mention">@name</e>`). Each pass rewrites one
//! family of elements; the passes run in a fixed order because later ones
//! assume earlier shapes are gone.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static ELEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<e\s+([^>]*?)\s*(?:/>|>(.*?)</e>)"#).expect("valid element regex")
});

static ATTRIBUTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([\w-]+)="([^"]*)""#).expect("valid attribute regex"));

static FOOTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:—{1,2}\s*)?发布于\s*.+?\s+\d{4}-\d{2}-\d{2}\s+\d{2}:\d{2}:\d{2}\s*")
        .expect("valid footer regex")
});

static ANY_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

const IMAGE_EXTENSIONS: [&str; 8] = [
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".webp", ".svg", ".ico",
];

const IMAGE_HOST_MARKERS: [&str; 7] = [
    "qpic.cn",
    "images.",
    "img.",
    "/images/",
    "/img/",
    "imagecdn.",
    "imgcdn.",
];

/// One parsed `<e>` element.
struct Element<'a> {
    attrs: Vec<(&'a str, &'a str)>,
    inner: Option<&'a str>,
}

impl<'a> Element<'a> {
    fn from_captures(caps: &Captures<'a>) -> Self {
        let attrs = caps
            .get(1)
            .map(|m| {
                ATTRIBUTE
                    .captures_iter(m.as_str())
                    .filter_map(|c| Some((c.get(1)?.as_str(), c.get(2)?.as_str())))
                    .collect()
            })
            .unwrap_or_default();
        Self {
            attrs,
            inner: caps.get(2).map(|m| m.as_str()),
        }
    }

    fn attr(&self, name: &str) -> Option<&'a str> {
        self.attrs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }

    fn kind(&self) -> &'a str {
        self.attr("type").unwrap_or("")
    }

    /// Decoded `title` attribute.
    fn title(&self) -> Option<String> {
        self.attr("title").map(decode_attribute)
    }
}

/// Rewrites every `<e>` element; `None` from the handler keeps it as is.
fn replace_elements<F>(text: &str, handler: F) -> String
where
    F: Fn(&Element<'_>) -> Option<String>,
{
    ELEMENT
        .replace_all(text, |caps: &Captures<'_>| {
            let element = Element::from_captures(caps);
            handler(&element).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Percent-decodes an attribute value, keeping it verbatim if it is not
/// valid UTF-8 once decoded.
pub fn decode_attribute(value: &str) -> String {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Removes the platform's "发布于 <group> <date> <time>" signature lines.
pub fn strip_footer(text: &str) -> String {
    FOOTER.replace_all(text, "").trim_end().to_string()
}

fn replace_formatting(text: &str) -> String {
    replace_elements(text, |el| match el.kind() {
        "mention" | "hashtag" | "web" => None,
        "text_bold" => el.title().map(|t| format!("**{t}**")),
        "text_italic" => el.title().map(|t| format!("*{t}*")),
        "text_delete" => el.title().map(|t| format!("~~{t}~~")),
        _ => el.title(),
    })
}

fn replace_mentions(text: &str) -> String {
    replace_elements(text, |el| {
        if el.kind() != "mention" {
            return None;
        }
        el.inner.map(str::to_string).or_else(|| el.title())
    })
}

fn replace_hashtags(text: &str) -> String {
    replace_elements(text, |el| {
        if el.kind() != "hashtag" {
            return None;
        }
        let raw = el.inner.map(str::to_string).or_else(|| el.title())?;
        Some(format!("#{}#", raw.trim_matches('#')))
    })
}

fn replace_web_links(text: &str) -> String {
    replace_elements(text, |el| {
        if el.kind() != "web" {
            return None;
        }
        let url = decode_attribute(el.attr("href")?);
        let label = el.title().unwrap_or_else(|| url.clone());
        let src = html_escape::encode_double_quoted_attribute(&url);

        if is_image_url(&url) {
            Some(format!(
                r#"<img src="{src}" alt="{}">"#,
                html_escape::encode_double_quoted_attribute(&label)
            ))
        } else {
            Some(format!(
                r#"<a href="{src}" target="_blank">{}</a>"#,
                html_escape::encode_text(&label)
            ))
        }
    })
}

/// Whether a URL points at an image, by extension or by a known image host
/// or path marker.
///
/// # Examples
///
/// ```
/// use zsxq_sync::processor::is_image_url;
///
/// assert!(is_image_url("https://example.com/a/photo.PNG?x=1"));
/// assert!(is_image_url("https://images.zsxq.com/abc"));
/// assert!(!is_image_url("https://example.com/post/1"));
/// ```
pub fn is_image_url(url: &str) -> bool {
    if url.is_empty() {
        return false;
    }
    let lower = url.to_lowercase();

    let path = match url::Url::parse(&lower) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => lower
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return true;
    }

    IMAGE_HOST_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Runs every inline pass, footer first.
fn normalize_inline(text: &str) -> String {
    let text = strip_footer(text);
    let text = replace_formatting(&text);
    let text = replace_mentions(&text);
    let text = replace_hashtags(&text);
    replace_web_links(&text)
}

/// Normalizes an article body into paragraph-wrapped HTML.
///
/// # Examples
///
/// ```
/// use zsxq_sync::processor::normalize_article;
///
/// let html = normalize_article("first\nline\n\nsecond");
/// assert_eq!(html, "<p>first<br>\nline</p>\n\n<p>second</p>");
/// ```
pub fn normalize_article(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    normalize_inline(text)
        .split("\n\n")
        .map(str::trim)
        .filter(|para| !para.is_empty())
        .map(|para| format!("<p>{}</p>", para.replace('\n', "<br>\n")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Normalizes a short-form body into a single paragraph block.
pub fn normalize_short_form(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let processed = normalize_inline(text)
        .replace("\n\n", "</p><p>")
        .replace('\n', "<br>");

    if processed.is_empty() || processed.starts_with("<p>") {
        processed
    } else {
        format!("<p>{processed}</p>")
    }
}

/// Reduces markup to plain text, for titles and comparisons.
///
/// Every `<e>` element becomes its visible text; any other tag is dropped.
pub fn strip_tags(text: &str) -> String {
    let plain = replace_elements(text, |el| {
        let visible = el
            .title()
            .or_else(|| el.inner.map(str::to_string))
            .or_else(|| el.attr("href").map(decode_attribute))
            .unwrap_or_default();
        Some(visible)
    });
    ANY_TAG.replace_all(&plain, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn footer_is_removed_in_all_dash_variants() {
        for footer in [
            "——发布于 星球名 2024-01-15 10:30:00",
            "— 发布于 星球名 2024-01-15 10:30:00",
            "发布于 星球名 2024-01-15 10:30:00",
        ] {
            let text = format!("正文内容\n\n{footer}\n");
            assert_eq!(strip_footer(&text), "正文内容");
        }
    }

    #[test]
    fn formatting_tags_become_lightweight_markup() {
        let text = concat!(
            r#"<e type="text_bold" title="%E5%8A%A0%E7%B2%97" /> "#,
            r#"<e type="text_italic" title="italic" /> "#,
            r#"<e type="text_delete" title="gone" /> "#,
            r#"<e type="text_unknown" title="plain" />"#,
        );
        assert_eq!(replace_formatting(text), "**加粗** *italic* ~~gone~~ plain");
    }

    #[test]
    fn formatting_pass_leaves_links_mentions_and_hashtags() {
        let text = r#"<e type="web" href="https%3A%2F%2Fa.com" title="a" /><e type="mention" uid="1" title="%40bob" />"#;
        assert_eq!(replace_formatting(text), text);
    }

    #[test]
    fn mentions_keep_visible_text() {
        let paired = r#"hi <e type="mention" uid="1">@某人</e>!"#;
        let selfclosing = r#"hi <e type="mention" uid="1" title="%40%E6%9F%90%E4%BA%BA" />!"#;
        assert_eq!(replace_mentions(paired), "hi @某人!");
        assert_eq!(replace_mentions(selfclosing), "hi @某人!");
    }

    #[test]
    fn hashtags_become_plain_markers() {
        let encoded = r#"<e type="hashtag" hid="9" title="%23%E6%8A%80%E6%9C%AF%23" />"#;
        let paired = r#"<e type="hashtag" hid="9">#技术#</e>"#;
        assert_eq!(replace_hashtags(encoded), "#技术#");
        assert_eq!(replace_hashtags(paired), "#技术#");
    }

    #[test]
    fn web_links_distinguish_images() {
        let link = r#"<e type="web" href="https%3A%2F%2Fexample.com%2Fpost" title="%E9%93%BE%E6%8E%A5" />"#;
        let image = r#"<e type="web" href="https%3A%2F%2Fexample.com%2Fpic.jpg" title="pic" />"#;
        let untitled = r#"<e type="web" href="https%3A%2F%2Fexample.com%2Fx" />"#;

        assert_eq!(
            replace_web_links(link),
            r#"<a href="https://example.com/post" target="_blank">链接</a>"#
        );
        assert_eq!(
            replace_web_links(image),
            r#"<img src="https://example.com/pic.jpg" alt="pic">"#
        );
        assert_eq!(
            replace_web_links(untitled),
            r#"<a href="https://example.com/x" target="_blank">https://example.com/x</a>"#
        );
    }

    #[test]
    fn web_link_without_href_is_kept() {
        let tag = r#"<e type="web" title="x" />"#;
        assert_eq!(replace_web_links(tag), tag);
    }

    #[test]
    fn image_detection_uses_extension_and_hosts() {
        assert!(is_image_url("https://a.com/x.webp"));
        assert!(is_image_url("https://a.com/img/123"));
        assert!(is_image_url("https://p1.qpic.cn/abc"));
        assert!(!is_image_url("https://a.com/x.jpg.html"));
        assert!(!is_image_url(""));
    }

    #[test]
    fn article_paragraphs_skip_empty_blocks() {
        let html = normalize_article("a\n\n\n\nb\nc");
        assert_eq!(html, "<p>a</p>\n\n<p>b<br>\nc</p>");
    }

    #[test]
    fn short_form_wraps_once() {
        assert_eq!(normalize_short_form("a\n\nb\nc"), "<p>a</p><p>b<br>c</p>");
        assert_eq!(normalize_short_form(""), "");
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert_eq!(normalize_article(""), "");
    }

    #[test]
    fn strip_tags_produces_plain_text() {
        let text = r#"<e type="text_bold" title="Rust" /> 与 <e type="web" href="https%3A%2F%2Fa.com" /> <b>x</b>"#;
        assert_eq!(strip_tags(text), "Rust 与 https://a.com x");
    }
}
