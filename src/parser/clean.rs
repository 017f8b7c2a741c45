use std::sync::LazyLock;

use regex::Regex;

static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").unwrap());

const SEE_MORE: &str = "See more";
pub const COMPANY_MAX_CHARS: usize = 100;

/// Collapse runs of blank lines into one empty line and trim. Input is already decoded
/// text, so tags and entities are gone.
pub fn clean_text(text: &str) -> String {
    BLANK_LINES_RE.replace_all(text, "\n\n").trim().to_string()
}

/// `clean_text`, with `None` for empty results.
pub fn clean_field(text: &str) -> Option<String> {
    Some(clean_text(text)).filter(|t| !t.is_empty())
}

/// Drop the collapsed "See more" button label and everything after it.
pub fn cut_see_more(text: String) -> String {
    match text.find(SEE_MORE) {
        Some(idx) => text[..idx].trim().to_string(),
        None => text,
    }
}

/// Hard cut at `COMPANY_MAX_CHARS` characters, no ellipsis.
pub fn truncate_company(text: String) -> String {
    if text.chars().count() <= COMPANY_MAX_CHARS {
        text
    } else {
        text.chars().take(COMPANY_MAX_CHARS).collect()
    }
}

/// URLs are passed on as opaque strings; only surrounding whitespace goes.
pub fn clean_url(raw: &str) -> Option<String> {
    Some(raw.trim().to_string()).filter(|u| !u.is_empty())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_blank_lines() {
        let raw = "first\n\n\n   \n\nsecond\nthird";
        assert_eq!(clean_text(raw), "first\n\nsecond\nthird");
    }

    #[test]
    fn empty_after_cleaning_is_none() {
        assert_eq!(clean_field(" \n\t \n "), None);
        assert_eq!(clean_field("x"), Some("x".to_string()));
    }

    #[test]
    fn see_more_cut() {
        let text = clean_text("Great product for teams.\n…See more\nhidden tail");
        assert_eq!(cut_see_more(text), "Great product for teams.\n…");
        assert_eq!(cut_see_more("no label".into()), "no label");
    }

    #[test]
    fn company_truncated_to_100_chars() {
        let long = "a".repeat(150);
        let cut = truncate_company(long);
        assert_eq!(cut.chars().count(), 100);
        assert_eq!(truncate_company("Acme".into()), "Acme");
    }

    #[test]
    fn truncation_counts_chars_not_bytes() {
        let long = "é".repeat(120);
        assert_eq!(truncate_company(long).chars().count(), 100);
    }

    #[test]
    fn url_trimmed_only() {
        assert_eq!(
            clean_url(" https://x.com/a?b=1&c=%20 ").as_deref(),
            Some("https://x.com/a?b=1&c=%20")
        );
        assert_eq!(clean_url("  "), None);
    }
}
