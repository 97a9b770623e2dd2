//! Text shaping helpers shared by collectors and enrichers.

use regex::Regex;
use std::sync::LazyLock;

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("invalid regex"));

/// Truncate to at most `max_chars` characters, appending an ellipsis when
/// anything was cut. Operates on characters, so multibyte sequences are never
/// split.
#[must_use]
pub fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Strip HTML tags, decode the common entities, and collapse all runs of
/// whitespace into single spaces.
#[must_use]
pub fn strip_html(text: &str) -> String {
    let without_tags = TAG.replace_all(text, " ");
    let decoded = without_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    collapse_whitespace(&decoded)
}

/// Collapse all whitespace runs (including newlines) into single spaces.
#[must_use]
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Flatten a possibly multi-line string into one trimmed line, capped at
/// `max_chars`. Used for comment previews inside context blocks.
#[must_use]
pub fn one_line(text: &str, max_chars: usize) -> String {
    truncate_with_ellipsis(&collapse_whitespace(text), max_chars)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_untouched() {
        assert_eq!(truncate_with_ellipsis("hello", 10), "hello");
        assert_eq!(truncate_with_ellipsis("hello", 5), "hello");
    }

    #[test]
    fn long_text_gets_ellipsis_within_cap() {
        let out = truncate_with_ellipsis("hello world", 8);
        assert_eq!(out, "hello w…");
        assert_eq!(out.chars().count(), 8);
    }

    #[test]
    fn truncation_never_splits_multibyte() {
        let text = "héllo wörld ünïcode"; // multibyte throughout
        for cap in 1..=text.chars().count() {
            let out = truncate_with_ellipsis(text, cap);
            assert!(out.chars().count() <= cap);
            // Would panic on invalid UTF-8 boundaries if chars were split.
            let _ = out.as_bytes();
        }
    }

    #[test]
    fn truncation_of_cjk_text() {
        let out = truncate_with_ellipsis("週刊技術ダイジェスト", 5);
        assert_eq!(out, "週刊技術…");
    }

    #[test]
    fn strips_tags_and_decodes_entities() {
        let html = "<p>Rails &amp; Hotwire</p>\n<div>release   notes</div>";
        assert_eq!(strip_html(html), "Rails & Hotwire release notes");
    }

    #[test]
    fn collapses_newlines_and_tabs() {
        assert_eq!(collapse_whitespace("a\n\n\tb   c"), "a b c");
    }

    #[test]
    fn one_line_flattens_and_caps() {
        let out = one_line("first line\nsecond line\nthird", 15);
        assert_eq!(out, "first line sec…");
    }

    #[test]
    fn empty_input_stays_empty() {
        assert_eq!(strip_html(""), "");
        assert_eq!(truncate_with_ellipsis("", 10), "");
    }
}
