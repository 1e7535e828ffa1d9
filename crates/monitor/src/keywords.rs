//! Keyword classification of email pings.
//!
//! A check with `filter_subject` or `filter_body` set decides the kind of an
//! inbound email by searching for its keywords instead of trusting the
//! address it was sent to. Failure keywords are tried first, then success,
//! then start. An email matching nothing is recorded as `ignore`.

use deadman_core::{KeywordFilter, PingInput, PingKind};

/// Kind a ping should be recorded as under `filter`.
pub fn classify(filter: &KeywordFilter, input: &PingInput) -> PingKind {
    if input.scheme != "email" || !filter.is_enabled() {
        return input.kind;
    }

    let mut haystack = String::new();
    if filter.filter_subject {
        haystack.push_str(input.subject.as_deref().unwrap_or_default());
        haystack.push('\n');
    }
    if filter.filter_body {
        haystack.push_str(input.body.as_deref().unwrap_or_default());
    }
    let haystack = haystack.to_lowercase();

    if matches_any(&haystack, &filter.failure_kw) {
        PingKind::Fail
    } else if matches_any(&haystack, &filter.success_kw) {
        PingKind::Success
    } else if matches_any(&haystack, &filter.start_kw) {
        PingKind::Start
    } else {
        PingKind::Ignore
    }
}

/// Case-insensitive substring match against a comma-separated keyword list.
fn matches_any(haystack: &str, keywords: &str) -> bool {
    keywords
        .split(',')
        .map(|kw| kw.trim().to_lowercase())
        .filter(|kw| !kw.is_empty())
        .any(|kw| haystack.contains(&kw))
}
