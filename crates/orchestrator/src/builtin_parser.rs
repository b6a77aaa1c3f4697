//! The always-available built-in parser, used when no user-supplied
//! plugin (spec §4.B) is registered or matches. It understands a generic
//! `TIMESTAMP LEVEL message` line shape, the common denominator across
//! syslog/application logs, and falls back to one raw-text event per
//! line when a line doesn't match.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use security_common::model::LogEvent;

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<ts>\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2})\s+(?P<level>[A-Z]+)\s+(?:(?P<source>[\w.\-]+):\s*)?(?P<message>.*)$").unwrap()
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Content-based heuristic: does this look like the line shape the
/// built-in parser understands (spec §4.F "content-based dispatch")?
pub fn sniff(raw_content: &str) -> bool {
    raw_content.lines().take(20).any(|l| line_re().is_match(l.trim()))
}

pub fn parse(raw_content: &str) -> Vec<LogEvent> {
    raw_content
        .lines()
        .enumerate()
        .map(|(idx, raw)| {
            let line_number = idx + 1;
            match line_re().captures(raw.trim()) {
                Some(caps) => LogEvent {
                    line_number,
                    raw_text: raw.to_string(),
                    timestamp: parse_timestamp(&caps["ts"]),
                    level: caps["level"].to_string(),
                    source: caps.name("source").map(|m| m.as_str().to_string()).unwrap_or_default(),
                    message: caps["message"].to_string(),
                    fields: Default::default(),
                },
                None => LogEvent {
                    line_number,
                    raw_text: raw.to_string(),
                    timestamp: None,
                    level: "unknown".to_string(),
                    source: String::new(),
                    message: raw.to_string(),
                    fields: Default::default(),
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_structured_line() {
        let events = parse("2024-01-15 10:30:45 ERROR auth: Failed login for admin from 10.0.0.5");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, "ERROR");
        assert_eq!(events[0].source, "auth");
        assert!(events[0].timestamp.is_some());
    }

    #[test]
    fn unrecognized_lines_fall_back_to_raw() {
        let events = parse("just some free text");
        assert_eq!(events[0].level, "unknown");
        assert_eq!(events[0].message, "just some free text");
    }

    #[test]
    fn sniff_detects_structured_content() {
        assert!(sniff("2024-01-15 10:30:45 ERROR auth: failed"));
        assert!(!sniff("no timestamps here at all"));
    }
}
