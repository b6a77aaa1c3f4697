//! SignaturePattern processor: a YARA-like subset (spec §4.D.2).
//!
//! `rule NAME { meta: {k=v…} strings: {$name = "literal" | /regex/ …}
//! condition: EXPR }`.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use security_common::model::{LogEvent, MatchDetail, Rule, RuleMatch, ScalarValue};
use uuid::Uuid;

use crate::cache::DialectCache;
use crate::error::RuleEngineError;

#[derive(Debug, Clone)]
pub enum StringPattern {
    Literal(String),
    Regex(std::sync::Arc<Regex>),
}

#[derive(Debug, Clone)]
pub struct CompiledString {
    pub name: String,
    pub pattern: StringPattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    AnyOfThem,
    AllOfThem,
    /// Documented limitation (spec §4.D.2): absent/other conditions are
    /// true iff at least one string yielded a match.
    AtLeastOne,
}

#[derive(Debug, Clone)]
pub struct CompiledSignatureRule {
    pub strings: Vec<CompiledString>,
    pub condition: Condition,
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)rule\s+(\w+)\s*\{(.*)\}\s*$").unwrap())
}

fn string_entry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)\$(?P<name>\w+)\s*=\s*(?:"(?P<literal>[^"]*)"|/(?P<regex>[^/]*)/(?P<flags>[a-z]*))"#).unwrap()
    })
}

pub fn compile(content: &str) -> Result<CompiledSignatureRule, RuleEngineError> {
    let caps = header_re().captures(content.trim()).ok_or_else(|| {
        RuleEngineError::input("E_SIG_HEADER", "rule must match `rule NAME { ... }`")
    })?;
    let body = caps.get(2).unwrap().as_str();

    let strings_block = extract_block(body, "strings").unwrap_or_default();
    let condition_text = extract_condition(body).unwrap_or_default();

    let mut strings = Vec::new();
    for entry in string_entry_re().captures_iter(&strings_block) {
        let name = entry["name"].to_string();
        if let Some(literal) = entry.name("literal") {
            strings.push(CompiledString { name, pattern: StringPattern::Literal(literal.as_str().to_string()) });
        } else if let Some(pattern) = entry.name("regex") {
            let re = Regex::new(&format!("(?mi){}", pattern.as_str())).map_err(|e| {
                RuleEngineError::input("E_SIG_REGEX", format!("invalid string pattern ${name}: {e}"))
            })?;
            strings.push(CompiledString { name, pattern: StringPattern::Regex(std::sync::Arc::new(re)) });
        }
    }
    if strings.is_empty() {
        return Err(RuleEngineError::input("E_SIG_NO_STRINGS", "rule declares no strings"));
    }

    let condition_lower = condition_text.to_lowercase();
    let condition = if condition_lower.contains("any of them") {
        Condition::AnyOfThem
    } else if condition_lower.contains("all of them") {
        Condition::AllOfThem
    } else {
        Condition::AtLeastOne
    };

    Ok(CompiledSignatureRule { strings, condition })
}

fn extract_block(body: &str, key: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?is){key}\s*:\s*\{{(.*?)\}}")).ok()?;
    re.captures(body).map(|c| c[1].to_string())
}

fn extract_condition(body: &str) -> Option<String> {
    let idx = body.to_lowercase().rfind("condition:")?;
    Some(body[idx + "condition:".len()..].trim().trim_end_matches('}').trim().to_string())
}

struct StringHit {
    matched_content: String,
    file_offset: Option<usize>,
    line_number: Option<usize>,
    context: String,
}

fn context_window(haystack: &str, start: usize, end: usize) -> String {
    let lo = haystack.char_indices().rev().find(|(i, _)| *i <= start.saturating_sub(50)).map(|(i, _)| i).unwrap_or(0);
    let hi = haystack.char_indices().find(|(i, _)| *i >= end + 50).map(|(i, _)| i).unwrap_or(haystack.len());
    haystack.get(lo..hi).unwrap_or(haystack).to_string()
}

fn find_hits(pattern: &StringPattern, haystack: &str, line_number: Option<usize>) -> Vec<StringHit> {
    let mut hits = Vec::new();
    match pattern {
        StringPattern::Literal(lit) => {
            if lit.is_empty() {
                return hits;
            }
            let lower_hay = haystack.to_lowercase();
            let lower_lit = lit.to_lowercase();
            let mut start = 0;
            while let Some(pos) = lower_hay[start..].find(&lower_lit) {
                let abs = start + pos;
                hits.push(StringHit {
                    matched_content: haystack[abs..abs + lit.len()].to_string(),
                    file_offset: line_number.is_none().then_some(abs),
                    line_number,
                    context: context_window(haystack, abs, abs + lit.len()),
                });
                start = abs + lit.len().max(1);
            }
        }
        StringPattern::Regex(re) => {
            for m in re.find_iter(haystack) {
                hits.push(StringHit {
                    matched_content: m.as_str().to_string(),
                    file_offset: line_number.is_none().then_some(m.start()),
                    line_number,
                    context: context_window(haystack, m.start(), m.end()),
                });
            }
        }
    }
    hits
}

/// Evaluate a compiled rule against `raw_content` then every event's raw
/// text, returning `None` when the rule's condition is not satisfied.
pub fn evaluate(rule: &Rule, compiled: &CompiledSignatureRule, events: &[LogEvent], raw_content: &str) -> Option<RuleMatch> {
    let mut details = Vec::new();
    let mut matched_string_names = std::collections::HashSet::new();

    for string in &compiled.strings {
        let mut yielded = false;
        for hit in find_hits(&string.pattern, raw_content, None) {
            yielded = true;
            details.push(to_match_detail(hit, &string.name));
        }
        for event in events {
            for hit in find_hits(&string.pattern, &event.raw_text, Some(event.line_number)) {
                yielded = true;
                details.push(to_match_detail(hit, &string.name));
            }
        }
        if yielded {
            matched_string_names.insert(string.name.clone());
        }
    }

    let satisfied = match compiled.condition {
        Condition::AnyOfThem => !matched_string_names.is_empty(),
        Condition::AllOfThem => matched_string_names.len() == compiled.strings.len(),
        Condition::AtLeastOne => !details.is_empty(),
    };
    if !satisfied {
        return None;
    }

    let total_matches = details.len();
    let confidence = (total_matches as f64 / 10.0).min(1.0);

    Some(RuleMatch {
        rule_id: rule.id,
        rule_type: rule.rule_type,
        severity: rule.severity,
        match_count: total_matches,
        confidence,
        details,
        mitre_attack_ids: rule.mitre_attack_ids.clone(),
        metadata: HashMap::new(),
    })
}

fn to_match_detail(hit: StringHit, string_name: &str) -> MatchDetail {
    let mut fields = HashMap::new();
    fields.insert("string_name".to_string(), ScalarValue::from(format!("${string_name}")));
    MatchDetail {
        matched_content: hit.matched_content,
        file_offset: hit.file_offset,
        line_number: hit.line_number,
        context: hit.context,
        fields,
    }
}

pub type SignatureCache = DialectCache<CompiledSignatureRule>;

pub fn cache() -> &'static SignatureCache {
    static CACHE: OnceLock<SignatureCache> = OnceLock::new();
    CACHE.get_or_init(SignatureCache::new)
}

pub fn compile_with_id(id: Uuid, content: &str) -> Result<CompiledSignatureRule, RuleEngineError> {
    cache().get_or_compile(id, content, compile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_common::model::Severity;

    fn rule(content: &str) -> Rule {
        Rule::new(security_common::model::RuleType::SignaturePattern, "t", content, Severity::High).unwrap()
    }

    #[test]
    fn any_of_them_matches_on_single_string() {
        let content = r#"rule Evil { strings: { $a = "malware" $b = /c2-[0-9]+/ } condition: any of them }"#;
        let compiled = compile(content).unwrap();
        let r = rule(content);
        let m = evaluate(&r, &compiled, &[], "payload contains malware signature").unwrap();
        assert_eq!(m.match_count, 1);
    }

    #[test]
    fn all_of_them_requires_every_string() {
        let content = r#"rule Evil { strings: { $a = "malware" $b = "dropper" } condition: all of them }"#;
        let compiled = compile(content).unwrap();
        let r = rule(content);
        assert!(evaluate(&r, &compiled, &[], "only malware here").is_none());
        assert!(evaluate(&r, &compiled, &[], "malware and dropper both present").is_some());
    }

    #[test]
    fn confidence_scales_with_total_matches() {
        let content = r#"rule Evil { strings: { $a = "x" } condition: any of them }"#;
        let compiled = compile(content).unwrap();
        let r = rule(content);
        let raw = "x ".repeat(20);
        let m = evaluate(&r, &compiled, &[], &raw).unwrap();
        assert_eq!(m.confidence, 1.0);
    }

    #[test]
    fn malformed_header_is_input_error() {
        assert!(compile("not a rule").is_err());
    }
}
