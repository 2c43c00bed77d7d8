//! Content hygiene for inbound message text.
//!
//! Messages render in web and mobile clients, so executable markup is
//! stripped before encryption; the ciphertext at rest is already clean.

use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<\s*(script|style|iframe|object|embed)\b.*?(</\s*\1\s*>|$)")
        .expect("script block pattern")
});

static EVENT_HANDLERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\son\w+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).expect("event handler pattern")
});

static JS_URIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)javascript\s*:").expect("js uri pattern"));

static MENTIONS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([A-Za-z0-9][A-Za-z0-9_.-]{0,63})").expect("mention pattern"));

/// Strip executable markup, keeping ordinary text and benign formatting.
pub fn sanitize(raw: &str) -> String {
    let without_blocks = SCRIPT_BLOCKS.replace_all(raw, "");
    let without_handlers = EVENT_HANDLERS.replace_all(&without_blocks, "");
    JS_URIS.replace_all(&without_handlers, "").into_owned()
}

/// `@username` tokens in order of first appearance, deduplicated.
pub fn extract_mentions(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    MENTIONS
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_blocks() {
        let out = sanitize("hi <script>alert(1)</script>there");
        assert_eq!(out, "hi there");
    }

    #[test]
    fn strips_unclosed_script() {
        let out = sanitize("before <script>evil(");
        assert_eq!(out, "before ");
    }

    #[test]
    fn strips_event_handlers_and_js_uris() {
        let out = sanitize(r#"<a href="javascript:boom()" onclick="boom()">x</a>"#);
        assert!(!out.to_lowercase().contains("javascript:"));
        assert!(!out.to_lowercase().contains("onclick"));
        assert!(out.contains("<a href="));
    }

    #[test]
    fn plain_text_passes_through() {
        let text = "just a *markdown* message with 3 < 5 maths";
        assert_eq!(sanitize(text), text);
    }

    #[test]
    fn mentions_extracted_in_order_without_dupes() {
        let mentions = extract_mentions("@bob hi @alice, cc @bob and @carol.lee");
        assert_eq!(mentions, vec!["bob", "alice", "carol.lee"]);
    }

    #[test]
    fn email_local_parts_still_match_as_mentions() {
        // The original behavior: anything @token-shaped is a candidate; the
        // membership lookup discards names that resolve to nobody.
        let mentions = extract_mentions("mail me at me@example.com");
        assert_eq!(mentions, vec!["example.com"]);
    }

    #[test]
    fn no_mentions_in_plain_text() {
        assert!(extract_mentions("nothing here").is_empty());
    }
}
