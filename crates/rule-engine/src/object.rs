//! ObjectPattern processor: a STIX-like subset (spec §4.D.4).
//!
//! Rule content is a JSON indicator object; `pattern` is split on
//! top-level ` AND ` / ` OR ` into `[object:property OP value]` clauses.

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use security_common::model::{LogEvent, MatchDetail, Rule, RuleMatch, ScalarValue};
use serde::Deserialize;
use uuid::Uuid;

use crate::cache::DialectCache;
use crate::error::RuleEngineError;

#[derive(Debug, Deserialize)]
struct StixIndicator {
    #[serde(rename = "type")]
    type_: String,
    pattern: String,
    #[serde(default)]
    valid_from: Option<DateTime<Utc>>,
    #[serde(default)]
    valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Contains,
    Like,
    Matches,
    In,
}

#[derive(Debug, Clone)]
enum ClauseValue {
    Single(String),
    List(Vec<String>),
    Regex(std::sync::Arc<Regex>),
}

#[derive(Debug, Clone)]
struct Clause {
    object_type: String,
    property: String,
    op: Op,
    value: ClauseValue,
}

#[derive(Debug, Clone)]
enum Expr {
    Clause(Clause),
    And(Vec<Clause>),
    Or(Vec<Clause>),
}

fn clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\[(?P<obj>[\w-]+):(?P<prop>[\w.\[\]'\-]+)\s*(?P<op>!=|=|contains|like|matches|in)\s*(?P<val>.+?)\]").unwrap()
    })
}

fn parse_clause(text: &str) -> Result<Clause, RuleEngineError> {
    let caps = clause_re()
        .captures(text.trim())
        .ok_or_else(|| RuleEngineError::input("E_STIX_CLAUSE", format!("malformed pattern clause: {text}")))?;
    let object_type = caps["obj"].to_string();
    let property = caps["prop"].to_string();
    let op = match caps["op"].to_lowercase().as_str() {
        "=" => Op::Eq,
        "!=" => Op::Ne,
        "contains" => Op::Contains,
        "like" => Op::Like,
        "matches" => Op::Matches,
        "in" => Op::In,
        other => return Err(RuleEngineError::input("E_STIX_OP", format!("unsupported operator: {other}"))),
    };
    let raw_value = caps["val"].trim();
    let value = match op {
        Op::In => {
            let inner = raw_value.trim_start_matches('(').trim_end_matches(')');
            ClauseValue::List(inner.split(',').map(|v| unquote(v.trim())).collect())
        }
        Op::Matches => {
            let pattern = unquote(raw_value);
            let re = Regex::new(&format!("(?i){pattern}"))
                .map_err(|e| RuleEngineError::input("E_STIX_REGEX", format!("invalid `matches` pattern: {e}")))?;
            ClauseValue::Regex(std::sync::Arc::new(re))
        }
        Op::Like => {
            let pattern = unquote(raw_value).replace('%', "*");
            ClauseValue::Single(pattern)
        }
        _ => ClauseValue::Single(unquote(raw_value)),
    };
    Ok(Clause { object_type, property, op, value })
}

fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    if (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
        || (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
    {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn compile(content: &str) -> Result<CompiledObjectRule, RuleEngineError> {
    let indicator: StixIndicator = serde_json::from_str(content)
        .map_err(|e| RuleEngineError::input("E_STIX_JSON", format!("invalid indicator JSON: {e}")))?;
    if indicator.type_ != "indicator" {
        return Err(RuleEngineError::input("E_STIX_TYPE", "object type must be \"indicator\""));
    }

    let top_and: Vec<&str> = indicator.pattern.split(" AND ").collect();
    let top_or: Vec<&str> = indicator.pattern.split(" OR ").collect();
    let expr = if top_and.len() > 1 && top_or.len() > 1 {
        return Err(RuleEngineError::input(
            "E_STIX_MIXED_OPERATORS",
            "pattern mixes top-level AND and OR without parenthesization",
        ));
    } else if top_and.len() > 1 {
        Expr::And(top_and.into_iter().map(parse_clause).collect::<Result<_, _>>()?)
    } else if top_or.len() > 1 {
        Expr::Or(top_or.into_iter().map(parse_clause).collect::<Result<_, _>>()?)
    } else {
        Expr::Clause(parse_clause(indicator.pattern.trim())?)
    };

    Ok(CompiledObjectRule { expr, valid_from: indicator.valid_from, valid_until: indicator.valid_until })
}

#[derive(Debug, Clone)]
pub struct CompiledObjectRule {
    expr: Expr,
    valid_from: Option<DateTime<Utc>>,
    valid_until: Option<DateTime<Utc>>,
}

fn resolve_aliases(property: &str) -> Vec<String> {
    let lower = property.to_lowercase();
    if let Some(algo) = lower.strip_prefix("hashes.") {
        return vec![algo.to_string()];
    }
    match lower.as_str() {
        "src_ref.value" => vec!["src_ip".into(), "source_ip".into()],
        "dst_ref.value" => vec!["dst_ip".into(), "destination_ip".into()],
        "name" => vec!["filename".into(), "process_name".into(), "name".into()],
        "command_line" => vec!["command_line".into(), "commandline".into()],
        other => vec![other.to_string()],
    }
}

fn value_matches(op: Op, actual: &str, value: &ClauseValue) -> bool {
    let actual_lower = actual.to_lowercase();
    match (op, value) {
        (Op::Eq, ClauseValue::Single(v)) => actual_lower == v.to_lowercase(),
        (Op::Ne, ClauseValue::Single(v)) => actual_lower != v.to_lowercase(),
        (Op::Contains, ClauseValue::Single(v)) => actual_lower.contains(&v.to_lowercase()),
        (Op::Like, ClauseValue::Single(v)) => glob_matches(v, &actual_lower),
        (Op::Matches, ClauseValue::Regex(re)) => re.is_match(actual),
        (Op::In, ClauseValue::List(list)) => list.iter().any(|v| actual_lower == v.to_lowercase()),
        _ => false,
    }
}

fn glob_matches(pattern: &str, actual_lower: &str) -> bool {
    let starts = pattern.starts_with('*');
    let ends = pattern.ends_with('*');
    let needle = pattern.trim_matches('*').to_lowercase();
    match (starts, ends) {
        (true, true) => actual_lower.contains(&needle),
        (true, false) => actual_lower.ends_with(&needle),
        (false, true) => actual_lower.starts_with(&needle),
        (false, false) => actual_lower == needle,
    }
}

fn clause_matches_event(clause: &Clause, event: &LogEvent) -> bool {
    resolve_aliases(&clause.property)
        .iter()
        .filter_map(|alias| event.resolve_field(alias).and_then(|v| v.as_text()))
        .any(|text| value_matches(clause.op, &text, &clause.value))
}

/// Classifies a clause for the `match_type` carried on its `MatchDetail`
/// (spec §4.D.4/§8 scenario 3: an `ipv4-addr:value` clause reports
/// `match_type = "ip_address"`).
fn clause_match_type(clause: &Clause) -> &'static str {
    let prop = clause.property.to_lowercase();
    match clause.object_type.to_lowercase().as_str() {
        "file" if prop.starts_with("hashes.") => "file_hash",
        "file" => "file_name",
        "ipv4-addr" | "ipv6-addr" => "ip_address",
        "domain-name" => "domain",
        "url" => "url",
        "network-traffic" if prop.contains("ref.value") => "ip_address",
        "network-traffic" => "network_traffic",
        "process" => "process",
        _ => "indicator",
    }
}

/// Object types for which raw-content substring search is "appropriate"
/// (spec §4.D.4): `file` (hash/name), and the network/host object types
/// scanned on their value-bearing property.
fn is_raw_scannable(clause: &Clause) -> bool {
    let prop = clause.property.to_lowercase();
    match clause.object_type.to_lowercase().as_str() {
        "file" => prop.starts_with("hashes.") || matches!(prop.as_str(), "name" | "file_name"),
        "ipv4-addr" | "ipv6-addr" | "domain-name" | "url" => prop == "value",
        "network-traffic" => matches!(prop.as_str(), "src_ref.value" | "dst_ref.value"),
        "process" => matches!(prop.as_str(), "name" | "command_line"),
        _ => false,
    }
}

fn clause_matches_raw_content(clause: &Clause, raw_content_lower: &str) -> bool {
    if !is_raw_scannable(clause) {
        return false;
    }
    match &clause.value {
        ClauseValue::Single(v) => raw_content_lower.contains(&v.to_lowercase()),
        ClauseValue::List(list) => list.iter().any(|v| raw_content_lower.contains(&v.to_lowercase())),
        ClauseValue::Regex(re) => re.is_match(raw_content_lower),
    }
}

/// Evaluates the expression against an event, returning the clause whose
/// match should be attributed on the resulting `MatchDetail` (the first
/// clause of an `And`, or whichever clause satisfied an `Or`).
fn expr_matching_clause_event<'a>(expr: &'a Expr, event: &LogEvent) -> Option<&'a Clause> {
    match expr {
        Expr::Clause(c) => clause_matches_event(c, event).then_some(c),
        Expr::And(clauses) => clauses.iter().all(|c| clause_matches_event(c, event)).then(|| &clauses[0]),
        Expr::Or(clauses) => clauses.iter().find(|c| clause_matches_event(c, event)),
    }
}

fn expr_matching_clause_raw<'a>(expr: &'a Expr, raw_content_lower: &str) -> Option<&'a Clause> {
    match expr {
        Expr::Clause(c) => clause_matches_raw_content(c, raw_content_lower).then_some(c),
        Expr::And(clauses) => {
            clauses.iter().all(|c| clause_matches_raw_content(c, raw_content_lower)).then(|| &clauses[0])
        }
        Expr::Or(clauses) => clauses.iter().find(|c| clause_matches_raw_content(c, raw_content_lower)),
    }
}

pub fn evaluate(
    rule: &Rule,
    compiled: &CompiledObjectRule,
    events: &[LogEvent],
    raw_content: &str,
    now: DateTime<Utc>,
) -> Option<RuleMatch> {
    if let Some(from) = compiled.valid_from {
        if now < from {
            return None;
        }
    }
    if let Some(until) = compiled.valid_until {
        if now > until {
            return None;
        }
    }

    let mut details = Vec::new();

    let raw_lower = raw_content.to_lowercase();
    if let Some(matched) = expr_matching_clause_raw(&compiled.expr, &raw_lower) {
        let mut fields = HashMap::new();
        fields.insert("match_type".to_string(), ScalarValue::from(clause_match_type(matched).to_string()));
        details.push(MatchDetail {
            matched_content: rule.name.clone(),
            file_offset: Some(0),
            line_number: None,
            context: raw_content.chars().take(100).collect(),
            fields,
        });
    }

    for event in events {
        if let Some(matched) = expr_matching_clause_event(&compiled.expr, event) {
            let mut fields = event.fields.clone();
            fields.insert("event_source".to_string(), ScalarValue::from(event.source.clone()));
            fields.insert("match_type".to_string(), ScalarValue::from(clause_match_type(matched).to_string()));
            details.push(MatchDetail {
                matched_content: event.raw_text.clone(),
                file_offset: None,
                line_number: Some(event.line_number),
                context: event.message.clone(),
                fields,
            });
        }
    }

    if details.is_empty() {
        return None;
    }

    let mut confidence = (details.len() as f64 / 5.0).min(1.0);
    if let Some(until) = compiled.valid_until {
        let remaining = (until - now).num_seconds();
        let decay = match compiled.valid_from {
            Some(from) => {
                let total = (until - from).num_seconds().max(1) as f64;
                (remaining.max(0) as f64 / total).clamp(0.0, 1.0)
            }
            None if remaining <= 0 => 0.0,
            None => 1.0,
        };
        confidence = (confidence * decay).max(0.1);
    }

    Some(RuleMatch {
        rule_id: rule.id,
        rule_type: rule.rule_type,
        severity: rule.severity,
        match_count: details.len(),
        confidence,
        details,
        mitre_attack_ids: rule.mitre_attack_ids.clone(),
        metadata: HashMap::new(),
    })
}

pub type ObjectCache = DialectCache<CompiledObjectRule>;

pub fn cache() -> &'static ObjectCache {
    static CACHE: OnceLock<ObjectCache> = OnceLock::new();
    CACHE.get_or_init(ObjectCache::new)
}

pub fn compile_with_id(id: Uuid, content: &str) -> Result<CompiledObjectRule, RuleEngineError> {
    cache().get_or_compile(id, content, compile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_common::model::Severity;
    use std::collections::HashMap as Map;

    fn rule(content: &str) -> Rule {
        Rule::new(security_common::model::RuleType::ObjectPattern, "t", content, Severity::High).unwrap()
    }

    fn event(fields: &[(&str, &str)]) -> LogEvent {
        let mut map = Map::new();
        for (k, v) in fields {
            map.insert(k.to_string(), ScalarValue::from(v.to_string()));
        }
        LogEvent {
            line_number: 1,
            raw_text: "evt".into(),
            timestamp: None,
            level: "high".into(),
            source: "edr".into(),
            message: "evt".into(),
            fields: map,
        }
    }

    #[test]
    fn matches_file_hash_against_event_field() {
        let content = r#"{"type":"indicator","id":"indicator--x","pattern":"[file:hashes.sha256 = 'abc123']"}"#;
        let compiled = compile(content).unwrap();
        let r = rule(content);
        let events = vec![event(&[("sha256", "ABC123")])];
        let m = evaluate(&r, &compiled, &events, "", Utc::now()).unwrap();
        assert_eq!(m.match_count, 1);
    }

    #[test]
    fn matches_file_hash_against_raw_content() {
        let content = r#"{"type":"indicator","id":"indicator--x","pattern":"[file:hashes.sha256 = 'deadbeef']"}"#;
        let compiled = compile(content).unwrap();
        let r = rule(content);
        let m = evaluate(&r, &compiled, &[], "payload hash deadbeef detected", Utc::now()).unwrap();
        assert_eq!(m.match_count, 1);
    }

    #[test]
    fn ipv4_addr_pattern_matches_raw_content_with_ip_address_match_type() {
        let content = r#"{"type":"indicator","id":"indicator--x","pattern":"[ipv4-addr:value = '1.2.3.4']","valid_from":"1970-01-01T00:00:00Z"}"#;
        let compiled = compile(content).unwrap();
        let r = rule(content);
        let m = evaluate(&r, &compiled, &[], "client 1.2.3.4 connected", Utc::now()).unwrap();
        assert_eq!(m.match_count, 1);
        assert_eq!(m.details[0].fields.get("match_type").and_then(|v| v.as_text()), Some("ip_address".to_string()));
    }

    #[test]
    fn expired_indicator_is_skipped() {
        let content = format!(
            r#"{{"type":"indicator","id":"indicator--x","pattern":"[file:hashes.sha256 = 'abc']","valid_until":"{}"}}"#,
            (Utc::now() - chrono::Duration::days(1)).to_rfc3339()
        );
        let compiled = compile(&content).unwrap();
        let r = rule(&content);
        assert!(evaluate(&r, &compiled, &[], "abc", Utc::now()).is_none());
    }

    #[test]
    fn src_ref_alias_resolves_to_src_ip() {
        let content = r#"{"type":"indicator","id":"indicator--x","pattern":"[network-traffic:src_ref.value = '10.0.0.5']"}"#;
        let compiled = compile(content).unwrap();
        let r = rule(content);
        let events = vec![event(&[("src_ip", "10.0.0.5")])];
        assert!(evaluate(&r, &compiled, &events, "", Utc::now()).is_some());
    }

    #[test]
    fn mixed_top_level_operators_rejected() {
        let content = r#"{"type":"indicator","id":"indicator--x","pattern":"[file:name = 'a'] AND [file:name = 'b'] OR [file:name = 'c']"}"#;
        let err = compile(content).unwrap_err();
        assert!(matches!(err, RuleEngineError::Input { code, .. } if code == "E_STIX_MIXED_OPERATORS"));
    }
}
