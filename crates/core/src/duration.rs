//! Human-readable duration parsing and formatting.

use std::time::Duration;

/// Parse a compact duration string such as `"90s"`, `"2h30m"` or `"1d12h"`.
///
/// Supports `w`, `d`, `h`, `m` and `s` components. A bare number is taken
/// as seconds. Returns `None` for empty or malformed input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            let unit = match ch {
                'w' => 604_800,
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return None,
            };
            total_secs = total_secs.checked_add(n.checked_mul(unit)?)?;
            found_unit = true;
        }
    }

    if !num_buf.is_empty() {
        // "30m15" is ambiguous.
        if found_unit {
            return None;
        }
        total_secs = num_buf.parse().ok()?;
    }

    Some(Duration::from_secs(total_secs))
}

const UNITS: [(u64, &str, &str); 4] = [
    (604_800, "week", "weeks"),
    (86_400, "day", "days"),
    (3_600, "hour", "hours"),
    (60, "minute", "minutes"),
];

/// Format a duration as words, largest unit first: `"1 day 2 hours"`.
///
/// Sub-minute remainders are dropped; durations shorter than a minute are
/// shown in seconds.
pub fn format_duration(d: Duration) -> String {
    let mut remaining = d.as_secs();
    let mut parts = Vec::new();

    for (secs, singular, plural) in UNITS {
        // "8 days" reads better than "1 week 1 day".
        if secs == 604_800 && remaining % secs != 0 {
            continue;
        }
        let v = remaining / secs;
        remaining %= secs;
        match v {
            0 => {}
            1 => parts.push(format!("1 {singular}")),
            n => parts.push(format!("{n} {plural}")),
        }
    }

    if parts.is_empty() {
        return match d.as_secs() {
            1 => "1 second".to_string(),
            n => format!("{n} seconds"),
        };
    }

    parts.join(" ")
}

/// Convert to a chrono duration for timestamp arithmetic.
pub fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}
