use once_cell::sync::Lazy;
use regex::Regex;

use super::markup::strip_tags;

static PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\s]").expect("valid punctuation regex"));

const MIN_TRUNCATED_CHARS: usize = 10;
const MIN_FUZZY_CHARS: usize = 8;

/// The first body line compared against a title.
struct Candidate<'a> {
    raw_line: &'a str,
    plain_line: String,
    clean_title: &'a str,
    source_line: Option<&'a str>,
}

type DuplicateRule = fn(&Candidate<'_>) -> bool;

/// Duplicate rules, tried in order; the first match wins.
const RULES: [(&str, DuplicateRule); 4] = [
    ("source_line", matches_source_line),
    ("prefix", matches_prefix),
    ("truncated", matches_truncated),
    ("fuzzy", matches_fuzzy),
];

fn matches_source_line(c: &Candidate<'_>) -> bool {
    c.source_line
        .is_some_and(|line| !line.is_empty() && c.raw_line == line)
}

fn matches_prefix(c: &Candidate<'_>) -> bool {
    !c.clean_title.is_empty() && c.plain_line.starts_with(c.clean_title)
}

fn matches_truncated(c: &Candidate<'_>) -> bool {
    c.clean_title.chars().count() >= MIN_TRUNCATED_CHARS
        && c.plain_line.starts_with(c.clean_title)
}

fn matches_fuzzy(c: &Candidate<'_>) -> bool {
    let title = PUNCTUATION.replace_all(c.clean_title, "");
    let line = PUNCTUATION.replace_all(&c.plain_line, "");
    !title.is_empty() && title.chars().count() >= MIN_FUZZY_CHARS && line.starts_with(&*title)
}

/// Returns the name of the first rule under which `line` repeats `title`.
pub fn duplicate_rule(line: &str, title: &str, source_line: Option<&str>) -> Option<&'static str> {
    let candidate = Candidate {
        raw_line: line,
        plain_line: strip_tags(line).trim().to_string(),
        clean_title: title.trim_end_matches(['…', '.']),
        source_line,
    };
    RULES
        .iter()
        .find(|(_, rule)| rule(&candidate))
        .map(|(name, _)| *name)
}

/// Drops leading body lines that merely repeat the title.
///
/// Lines are compared with markup stripped, so `body` may still contain raw
/// `<e>` elements. Removal repeats until the first line no longer matches,
/// which makes the operation idempotent. An empty `title` leaves the body
/// untouched.
///
/// # Examples
///
/// ```
/// use zsxq_sync::processor::remove_leading_duplicate;
///
/// let body = "如何提升开发效率\n\n第一段\n第二段";
/// let cleaned = remove_leading_duplicate(body, "如何提升开发效率", None);
/// assert_eq!(cleaned, "第一段\n第二段");
/// ```
pub fn remove_leading_duplicate(body: &str, title: &str, source_line: Option<&str>) -> String {
    if title.is_empty() {
        return body.to_string();
    }

    let mut remaining = body.trim();
    let mut removed = false;

    while !remaining.is_empty() {
        let (first, rest) = remaining.split_once('\n').unwrap_or((remaining, ""));
        match duplicate_rule(first.trim(), title, source_line) {
            Some(rule) => {
                tracing::debug!(rule, line = first.trim(), "Dropping duplicated title line");
                remaining = rest.trim();
                removed = true;
            }
            None => break,
        }
    }

    if removed {
        remaining.to_string()
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_source_line_is_removed() {
        let raw = r#"<e type="text_bold" title="Rust" /> 入门"#;
        let body = format!("{raw}\n正文");
        assert_eq!(
            remove_leading_duplicate(&body, "完全不同", Some(raw)),
            "正文"
        );
    }

    #[test]
    fn truncated_title_matches_prefix() {
        let body = "这是一个非常长的标题行，后面还有很多很多的内容\n正文";
        let title = "这是一个非常长的标题行…";
        assert_eq!(duplicate_rule(body.lines().next().unwrap(), title, None), Some("prefix"));
        assert_eq!(remove_leading_duplicate(body, title, None), "正文");
    }

    #[test]
    fn punctuation_insensitive_match() {
        let line = "Rust，异步编程！指南（上）";
        let title = "Rust异步编程指南";
        assert_eq!(duplicate_rule(line, title, None), Some("fuzzy"));
    }

    #[test]
    fn fuzzy_match_needs_eight_characters() {
        assert_eq!(duplicate_rule("短，标题！正文", "短标题", None), None);
    }

    #[test]
    fn ellipsis_only_title_does_not_match_everything() {
        assert_eq!(duplicate_rule("任意内容", "…", None), None);
    }

    #[test]
    fn markup_in_first_line_is_ignored_for_matching() {
        let body = "<e type=\"text_bold\" title=\"%E6%A0%87%E9%A2%98\" />内容\n正文";
        assert_eq!(remove_leading_duplicate(body, "标题内容", None), "正文");
    }

    #[test]
    fn empty_title_is_a_no_op() {
        let body = "  第一行\n第二行  ";
        assert_eq!(remove_leading_duplicate(body, "", Some("第一行")), body);
    }

    #[test]
    fn unmatched_body_is_returned_unchanged() {
        let body = "\n正文第一行\n正文第二行\n";
        assert_eq!(remove_leading_duplicate(body, "标题", None), body);
    }

    #[test]
    fn repeated_title_lines_are_all_removed() {
        let body = "标题\n标题\n\n正文";
        assert_eq!(remove_leading_duplicate(body, "标题", None), "正文");
    }

    #[test]
    fn removal_is_idempotent() {
        let cases = [
            ("标题\n标题\n正文", "标题", None),
            ("如何提升开发效率\n\n长正文", "如何提升开发效率", Some("如何提升开发效率")),
            ("无关\n内容", "标题", None),
            ("标题", "标题", None),
        ];
        for (body, title, source_line) in cases {
            let once = remove_leading_duplicate(body, title, source_line);
            let twice = remove_leading_duplicate(&once, title, source_line);
            assert_eq!(once, twice, "body: {body:?}");
        }
    }
}
