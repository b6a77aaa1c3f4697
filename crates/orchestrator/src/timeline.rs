//! Timeline construction (spec §4.F progress anchor 70): an ordered
//! merge of parsed events and rule-match timestamps.

use chrono::{DateTime, Utc};
use security_common::model::{LogEvent, RuleMatch};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub timestamp: Option<DateTime<Utc>>,
    pub line_number: Option<usize>,
    pub kind: TimelineEntryKind,
    pub summary: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEntryKind {
    Event,
    RuleMatch,
}

/// Merge events and rule-match details into one chronologically ordered
/// timeline. Entries without a timestamp sort after timestamped ones but
/// otherwise preserve their original relative order (stable sort).
pub fn build(events: &[LogEvent], matches: &[RuleMatch]) -> Vec<TimelineEntry> {
    let mut entries: Vec<TimelineEntry> = Vec::with_capacity(events.len() + matches.len());

    for event in events {
        entries.push(TimelineEntry {
            timestamp: event.timestamp,
            line_number: Some(event.line_number),
            kind: TimelineEntryKind::Event,
            summary: event.message.clone(),
        });
    }

    for m in matches {
        for detail in &m.details {
            entries.push(TimelineEntry {
                timestamp: None,
                line_number: detail.line_number,
                kind: TimelineEntryKind::RuleMatch,
                summary: detail.matched_content.clone(),
            });
        }
    }

    entries.sort_by_key(|e| (e.timestamp.is_none(), e.timestamp));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_common::model::{MatchDetail, RuleType, Severity};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn event(line: usize, ts: Option<DateTime<Utc>>) -> LogEvent {
        LogEvent {
            line_number: line,
            raw_text: String::new(),
            timestamp: ts,
            level: "info".into(),
            source: "test".into(),
            message: format!("line {line}"),
            fields: HashMap::new(),
        }
    }

    #[test]
    fn timeline_orders_timestamped_entries_first() {
        let now = Utc::now();
        let events = vec![
            event(2, Some(now + chrono::Duration::seconds(10))),
            event(1, Some(now)),
        ];
        let matches: Vec<RuleMatch> = vec![RuleMatch {
            rule_id: Uuid::new_v4(),
            rule_type: RuleType::SignaturePattern,
            severity: Severity::Low,
            match_count: 1,
            confidence: 0.1,
            details: vec![MatchDetail {
                matched_content: "hit".into(),
                file_offset: None,
                line_number: None,
                context: String::new(),
                fields: HashMap::new(),
            }],
            mitre_attack_ids: vec![],
            metadata: HashMap::new(),
        }];

        let timeline = build(&events, &matches);
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].line_number, Some(1));
        assert_eq!(timeline[1].line_number, Some(2));
        assert_eq!(timeline[2].kind, TimelineEntryKind::RuleMatch);
    }
}
