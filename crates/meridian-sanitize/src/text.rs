use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::debug;

/// Markup and URL schemes that must never survive into posted content.
static DANGEROUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"<script[^>]*>.*?</script>",
        r"<iframe[^>]*>.*?</iframe>",
        r"<object[^>]*>.*?</object>",
        r"<embed[^>]*>.*?</embed>",
        r"<style[^>]*>.*?</style>",
        r"<link[^>]*>",
        r"<meta[^>]*>",
        r"javascript:",
        r"vbscript:",
        r"data:text/html",
        r"on\w+\s*=",
        r"expression\s*\(",
    ]
    .iter()
    .map(|pattern| {
        RegexBuilder::new(pattern)
            .case_insensitive(true)
            .dot_matches_new_line(true)
            .build()
            .expect("dangerous-pattern regex is valid")
    })
    .collect()
});

/// Clean free-form text for storage or posting.
///
/// Drops control characters, removes dangerous markup, escapes what is left,
/// collapses whitespace, and truncates to `max_length` characters with an
/// ellipsis. Never fails; hostile input degrades to an empty string.
pub fn sanitize_text(text: &str, max_length: Option<usize>) -> String {
    let mut cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect();

    for pattern in DANGEROUS_PATTERNS.iter() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }

    let escaped = escape_html(&cleaned);
    let mut out = escaped.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(max) = max_length
        && out.chars().count() > max
    {
        out = truncate_with_ellipsis(&out, max);
        debug!(max, "text truncated");
    }
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    if max <= 3 {
        return text.chars().take(max).collect();
    }
    let mut out: String = text.chars().take(max - 3).collect();
    out.push_str("...");
    out
}
