use crate::config::TitleSettings;
use crate::models::{ContentClass, SourceRecord};

use super::markup::strip_tags;
use super::timestamp::{TimestampError, format_share_date, format_short_stamp, parse_timestamp};

/// Punctuation that marks a line as a sentence rather than a heading.
const CLAUSE_TERMINALS: [char; 5] = ['。', '！', '？', '，', '、'];
const SENTENCE_TERMINALS: [char; 3] = ['。', '！', '？'];
const BREAKPOINTS: [char; 7] = ['：', ':', '，', '、', ' ', '-', '－'];

const MAX_HEADING_CHARS: usize = 80;
const MAX_TITLE_CHARS: usize = 50;
const SMART_CUT_START: usize = 20;
const SMART_CUT_END: usize = 45;
const FALLBACK_CUT: usize = 30;
const ELLIPSIS: char = '…';

/// A synthesized title and the raw body line it was taken from, if any.
///
/// `source_line` feeds [`super::remove_leading_duplicate`] so the body's
/// first line can be matched exactly even when the title was cleaned up or
/// shortened.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SynthesizedTitle {
    pub title: String,
    pub source_line: Option<String>,
}

impl SynthesizedTitle {
    fn plain(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_line: None,
        }
    }
}

/// Synthesizes a title for `record` following the rules of its class.
///
/// Fails only when the body is empty and `created_at` is present but
/// unparseable; callers fall back to the placeholder title.
pub fn synthesize_title(
    record: &SourceRecord,
    class: ContentClass,
    settings: &TitleSettings,
) -> Result<SynthesizedTitle, TimestampError> {
    match class {
        ContentClass::Article => article_title(record, &settings.placeholder_title),
        ContentClass::ShortForm => short_form_title(
            record,
            settings.max_title_length,
            &settings.title_prefix,
            &settings.placeholder_title,
        ),
    }
}

/// Derives an article title.
///
/// In order: explicit title, a heading-like first line (shortened at a
/// natural breakpoint when long), the first sentence, a 30-character
/// prefix, and finally the share date or `placeholder` for empty bodies.
pub fn article_title(
    record: &SourceRecord,
    placeholder: &str,
) -> Result<SynthesizedTitle, TimestampError> {
    if let Some(explicit) = record.explicit_title() {
        return Ok(SynthesizedTitle::plain(explicit));
    }

    let text = record.body_text();
    let raw_first = text.trim().split('\n').next().unwrap_or_default().trim();

    if !raw_first.is_empty() {
        let first = strip_tags(raw_first);
        let first = first.trim();
        let len = first.chars().count();

        if !first.is_empty() && len <= MAX_HEADING_CHARS && !first.ends_with(CLAUSE_TERMINALS) {
            let title = if len > MAX_TITLE_CHARS {
                smart_cut(first)
            } else {
                first.to_string()
            };
            return Ok(SynthesizedTitle {
                title,
                source_line: Some(raw_first.to_string()),
            });
        }
    }

    let clean = collapse_whitespace(&strip_tags(text));
    if !clean.is_empty() {
        let sentence = clean.split(SENTENCE_TERMINALS).next().unwrap_or_default().trim();
        if !sentence.is_empty() && sentence.chars().count() <= MAX_TITLE_CHARS {
            return Ok(SynthesizedTitle::plain(sentence));
        }
        return Ok(SynthesizedTitle::plain(truncate_with_ellipsis(
            &clean,
            FALLBACK_CUT,
        )));
    }

    match record.created_at() {
        Some(created_at) => {
            let dt = parse_timestamp(created_at)?;
            Ok(SynthesizedTitle::plain(format_share_date(&dt)))
        }
        None => Ok(SynthesizedTitle::plain(placeholder)),
    }
}

/// Derives a short-form title: the flattened body, cut at `max_length`
/// characters, behind `prefix`.
pub fn short_form_title(
    record: &SourceRecord,
    max_length: usize,
    prefix: &str,
    placeholder: &str,
) -> Result<SynthesizedTitle, TimestampError> {
    let clean = collapse_whitespace(&strip_tags(record.body_text()));

    let body = if !clean.is_empty() {
        if clean.chars().count() <= max_length {
            clean
        } else {
            let mut cut: String = clean.chars().take(max_length).collect();
            cut.truncate(cut.trim_end().len());
            if !cut.ends_with(CLAUSE_TERMINALS) {
                cut.push(ELLIPSIS);
            }
            cut
        }
    } else {
        match record.created_at() {
            Some(created_at) => format_short_stamp(&parse_timestamp(created_at)?),
            None => placeholder.to_string(),
        }
    };

    Ok(SynthesizedTitle::plain(with_prefix(prefix, &body)))
}

fn with_prefix(prefix: &str, body: &str) -> String {
    if prefix.is_empty() {
        body.to_string()
    } else {
        format!("{prefix} {body}")
    }
}

/// Shortens a long heading at the first breakpoint found between
/// characters 20 and 45, or at 30 when none is found.
fn smart_cut(line: &str) -> String {
    let chars: Vec<char> = line.chars().collect();

    let cut = BREAKPOINTS
        .iter()
        .find_map(|bp| {
            chars
                .iter()
                .skip(SMART_CUT_START)
                .position(|c| c == bp)
                .map(|offset| offset + SMART_CUT_START)
                .filter(|&pos| pos < SMART_CUT_END)
        })
        .map_or(FALLBACK_CUT, |pos| pos + 1);

    let head: String = chars[..cut.min(chars.len())].iter().collect();
    let mut title = head.trim_end_matches(['：', ':', ' ']).to_string();
    title.push(ELLIPSIS);
    title
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let mut cut: String = text.chars().take(max_chars).collect();
        cut.push(ELLIPSIS);
        cut
    } else {
        text.to_string()
    }
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
