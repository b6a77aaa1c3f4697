//! StructuredDetection processor: a Sigma-like subset (spec §4.D.3).
//!
//! The condition grammar is intentionally restricted to a single
//! precedence level: an expression mixing `and` and `or` at the same
//! nesting level without full parenthesization is a compile error
//! rather than a silently ambiguous evaluation (spec §9 open question).

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use security_common::model::{LogEvent, MatchDetail, Rule, RuleMatch, ScalarValue};
use serde::Deserialize;
use uuid::Uuid;

use crate::cache::DialectCache;
use crate::error::RuleEngineError;

#[derive(Debug, Deserialize)]
struct SigmaDoc {
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    logsource: LogSource,
    detection: serde_yaml::Mapping,
}

#[derive(Debug, Default, Deserialize)]
struct LogSource {
    #[serde(default)]
    product: Option<String>,
    #[serde(default)]
    service: Option<String>,
}

#[derive(Debug, Clone)]
enum FieldMatcher {
    Exact(String),
    Substring(String),
    Glob(Regex),
}

impl FieldMatcher {
    fn compile(pattern: &str) -> Self {
        let starts = pattern.starts_with('*');
        let ends = pattern.ends_with('*');
        if starts && ends && pattern.len() > 1 {
            FieldMatcher::Substring(pattern[1..pattern.len() - 1].to_lowercase())
        } else if starts || ends {
            let escaped = regex::escape(pattern.trim_matches('*'));
            let anchored = format!(
                "(?i)^{}{}{}$",
                if starts { ".*" } else { "" },
                escaped,
                if ends { ".*" } else { "" },
            );
            FieldMatcher::Glob(Regex::new(&anchored).unwrap())
        } else {
            FieldMatcher::Exact(pattern.to_lowercase())
        }
    }

    fn matches(&self, value: &str) -> bool {
        let lower = value.to_lowercase();
        match self {
            FieldMatcher::Exact(expected) => &lower == expected,
            FieldMatcher::Substring(needle) => lower.contains(needle.as_str()),
            FieldMatcher::Glob(re) => re.is_match(value),
        }
    }
}

#[derive(Debug, Clone)]
struct FieldCriterion {
    field: String,
    matchers: Vec<FieldMatcher>,
}

#[derive(Debug, Clone)]
struct Selection {
    name: String,
    criteria: Vec<FieldCriterion>,
}

impl Selection {
    fn matches(&self, event: &LogEvent) -> bool {
        self.criteria.iter().all(|c| {
            let Some(text) = event.resolve_field(&c.field).and_then(|v| v.as_text()) else { return false };
            c.matchers.iter().any(|m| m.matches(&text))
        })
    }
}

#[derive(Debug, Clone)]
enum Token {
    Ident(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

fn tokenize(condition: &str) -> Vec<Token> {
    let spaced = condition.replace('(', " ( ").replace(')', " ) ");
    spaced
        .split_whitespace()
        .map(|t| match t.to_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "(" => Token::LParen,
            ")" => Token::RParen,
            _ => Token::Ident(t.to_string()),
        })
        .collect()
}

/// Single-precedence-level boolean expression: `term (op term)*` where
/// every `op` at a given nesting level must be the same (`and` XOR `or`),
/// `not` may prefix any atom, and parentheses introduce a fresh level.
#[derive(Debug, Clone)]
enum Expr {
    Ident(String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn parse_atom(&mut self) -> Result<Expr, RuleEngineError> {
        match self.advance() {
            Some(Token::Not) => Ok(Expr::Not(Box::new(self.parse_atom()?))),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(RuleEngineError::input("E_SIGMA_PAREN", "unbalanced parentheses in condition")),
                }
            }
            Some(Token::Ident(name)) => Ok(Expr::Ident(name.clone())),
            _ => Err(RuleEngineError::input("E_SIGMA_TOKEN", "expected a selection name, `not`, or `(`")),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, RuleEngineError> {
        let mut operands = vec![self.parse_atom()?];
        let mut seen_and = false;
        let mut seen_or = false;
        loop {
            match self.peek() {
                Some(Token::And) => {
                    seen_and = true;
                    self.pos += 1;
                    operands.push(self.parse_atom()?);
                }
                Some(Token::Or) => {
                    seen_or = true;
                    self.pos += 1;
                    operands.push(self.parse_atom()?);
                }
                _ => break,
            }
        }
        if seen_and && seen_or {
            return Err(RuleEngineError::input(
                "E_SIGMA_MIXED_OPERATORS",
                "condition mixes `and` and `or` at the same level without parentheses",
            ));
        }
        if operands.len() == 1 {
            return Ok(operands.into_iter().next().unwrap());
        }
        Ok(if seen_and { Expr::And(operands) } else { Expr::Or(operands) })
    }
}

fn parse_condition(condition: &str) -> Result<Expr, RuleEngineError> {
    let tokens = tokenize(condition);
    if tokens.is_empty() {
        return Err(RuleEngineError::input("E_SIGMA_EMPTY", "detection.condition is empty"));
    }
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if parser.pos != tokens.len() {
        return Err(RuleEngineError::input("E_SIGMA_TRAILING", "trailing tokens after condition expression"));
    }
    Ok(expr)
}

fn eval_expr(expr: &Expr, selections: &HashMap<String, bool>) -> bool {
    match expr {
        // Unknown selection names evaluate false (spec §4.D.3).
        Expr::Ident(name) => selections.get(name).copied().unwrap_or(false),
        Expr::Not(inner) => !eval_expr(inner, selections),
        Expr::And(parts) => parts.iter().all(|p| eval_expr(p, selections)),
        Expr::Or(parts) => parts.iter().any(|p| eval_expr(p, selections)),
    }
}

#[derive(Debug, Clone)]
pub struct CompiledStructuredRule {
    level: Option<String>,
    product: Option<String>,
    service: Option<String>,
    selections: Vec<Selection>,
    condition: String,
}

fn criteria_from_value(field: &str, value: &serde_yaml::Value) -> FieldCriterion {
    let patterns: Vec<String> = match value {
        serde_yaml::Value::Sequence(seq) => seq.iter().map(scalar_to_string).collect(),
        other => vec![scalar_to_string(other)],
    };
    FieldCriterion {
        field: field.to_string(),
        matchers: patterns.iter().map(|p| FieldMatcher::compile(p)).collect(),
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

pub fn compile(content: &str) -> Result<CompiledStructuredRule, RuleEngineError> {
    let doc: SigmaDoc = serde_yaml::from_str(content)
        .map_err(|e| RuleEngineError::input("E_SIGMA_YAML", format!("invalid structured detection document: {e}")))?;

    let condition_value = doc
        .detection
        .get(serde_yaml::Value::String("condition".to_string()))
        .ok_or_else(|| RuleEngineError::input("E_SIGMA_NO_CONDITION", "detection.condition is required"))?;
    let condition = scalar_to_string(condition_value);
    // Validate up front so a malformed grammar fails compilation, not evaluation.
    parse_condition(&condition)?;

    let mut selections = Vec::new();
    for (key, value) in doc.detection.iter() {
        let serde_yaml::Value::String(name) = key else { continue };
        if name == "condition" {
            continue;
        }
        let serde_yaml::Value::Mapping(fields) = value else {
            return Err(RuleEngineError::input(
                "E_SIGMA_SELECTION",
                format!("selection `{name}` must be a field → value mapping"),
            ));
        };
        let criteria = fields
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|field| criteria_from_value(field, v)))
            .collect();
        selections.push(Selection { name: name.clone(), criteria });
    }

    Ok(CompiledStructuredRule {
        level: doc.level,
        product: doc.logsource.product,
        service: doc.logsource.service,
        selections,
        condition,
    })
}

fn level_weight(level: &str) -> f64 {
    match level.to_lowercase().as_str() {
        "critical" => 0.9,
        "high" => 0.8,
        "medium" => 0.7,
        "low" => 0.6,
        "informational" => 0.5,
        _ => 0.5,
    }
}

pub fn evaluate(rule: &Rule, compiled: &CompiledStructuredRule, events: &[LogEvent]) -> Option<RuleMatch> {
    let expr = parse_condition(&compiled.condition).ok()?;

    let mut details = Vec::new();
    for event in events {
        if let Some(product) = &compiled.product {
            if !event.source.to_lowercase().contains(&product.to_lowercase()) {
                continue;
            }
        }
        if let Some(service) = &compiled.service {
            let event_service = event
                .resolve_field("service")
                .and_then(|v| v.as_text())
                .unwrap_or_default();
            if !event_service.to_lowercase().contains(&service.to_lowercase()) {
                continue;
            }
        }

        let selection_results: HashMap<String, bool> = compiled
            .selections
            .iter()
            .map(|s| (s.name.clone(), s.matches(event)))
            .collect();

        if eval_expr(&expr, &selection_results) {
            let mut fields = event.fields.clone();
            fields.insert("event_level".to_string(), ScalarValue::from(event.level.clone()));
            fields.insert("event_source".to_string(), ScalarValue::from(event.source.clone()));
            fields.insert("event_message".to_string(), ScalarValue::from(event.message.clone()));
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

    let level_score = compiled.level.as_deref().map(level_weight).unwrap_or(0.5);
    let volume_score = (details.len() as f64 / 5.0).min(1.0);
    let confidence = (level_score + volume_score) / 2.0;

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

pub type StructuredCache = DialectCache<CompiledStructuredRule>;

pub fn cache() -> &'static StructuredCache {
    static CACHE: OnceLock<StructuredCache> = OnceLock::new();
    CACHE.get_or_init(StructuredCache::new)
}

pub fn compile_with_id(id: Uuid, content: &str) -> Result<CompiledStructuredRule, RuleEngineError> {
    cache().get_or_compile(id, content, compile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_common::model::Severity;
    use std::collections::HashMap as Map;

    fn rule(content: &str) -> Rule {
        Rule::new(security_common::model::RuleType::StructuredDetection, "t", content, Severity::High).unwrap()
    }

    fn event(message: &str, source: &str) -> LogEvent {
        LogEvent {
            line_number: 1,
            raw_text: message.to_string(),
            timestamp: None,
            level: "high".to_string(),
            source: source.to_string(),
            message: message.to_string(),
            fields: Map::new(),
        }
    }

    const DOC: &str = r#"
title: Suspicious PowerShell
level: high
logsource:
  product: windows
detection:
  selection:
    message: "*powershell*"
  condition: selection
"#;

    #[test]
    fn matches_wildcard_selection() {
        let compiled = compile(DOC).unwrap();
        let r = rule(DOC);
        let events = vec![event("launched powershell.exe -enc", "windows-security")];
        let m = evaluate(&r, &compiled, &events).unwrap();
        assert_eq!(m.match_count, 1);
    }

    #[test]
    fn product_mismatch_is_rejected() {
        let compiled = compile(DOC).unwrap();
        let r = rule(DOC);
        let events = vec![event("launched powershell.exe", "linux-audit")];
        assert!(evaluate(&r, &compiled, &events).is_none());
    }

    #[test]
    fn mixed_and_or_without_parens_is_rejected() {
        let doc = r#"
detection:
  a:
    field: "1"
  b:
    field: "2"
  c:
    field: "3"
  condition: a and b or c
"#;
        let err = compile(doc).unwrap_err();
        assert!(matches!(err, RuleEngineError::Input { code, .. } if code == "E_SIGMA_MIXED_OPERATORS"));
    }

    #[test]
    fn parenthesized_mixed_operators_are_accepted() {
        let doc = r#"
detection:
  a:
    field: "1"
  b:
    field: "2"
  condition: (a and b) or not a
"#;
        assert!(compile(doc).is_ok());
    }

    #[test]
    fn unknown_selection_name_evaluates_false() {
        let doc = r#"
detection:
  a:
    field: "1"
  condition: missing
"#;
        let compiled = compile(doc).unwrap();
        let r = rule(doc);
        let mut e = event("x", "s");
        e.fields.insert("field".to_string(), ScalarValue::from("1".to_string()));
        assert!(evaluate(&r, &compiled, &[e]).is_none());
    }
}
