//! Rule Engine dispatcher (spec §4.D.1): groups rules by dialect and
//! delegates to the dialect-specific processor. One processor's failure
//! never aborts the others; all per-rule compilation errors are data,
//! reported alongside whatever matches were produced.

pub mod cache;
pub mod custom;
pub mod error;
pub mod object;
pub mod signature;
pub mod structured;

use std::panic::AssertUnwindSafe;

use chrono::Utc;
use security_common::model::{LogEvent, Rule, RuleMatch, RuleType};
use security_common::ports::PersistencePort;
use uuid::Uuid;

pub use custom::CustomRuleProcessor;
pub use error::RuleEngineError;

/// A compilation/evaluation failure attributed to one rule (spec §7
/// `InputError` / `ProcessingError`: always data, never a panic).
#[derive(Debug, Clone)]
pub struct RuleFailure {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub error: RuleEngineError,
}

/// Outcome of one full dispatch pass (spec §4.D.1 `process`).
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub matches: Vec<RuleMatch>,
    pub failures: Vec<RuleFailure>,
}

/// `{errors, warnings}` from validating a single rule in isolation (spec
/// §8 "Re-running validate(rule) twice yields identical lists").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Validate a rule's content against its declared dialect without
/// registering it anywhere (spec §4.D top-level failure semantics:
/// compilation errors are data). Pure and idempotent.
pub fn validate(rule: &Rule) -> ValidationResult {
    if rule.content.trim().is_empty() {
        return ValidationResult {
            errors: vec!["empty".to_string()],
            warnings: vec![],
        };
    }
    let compiled = match rule.rule_type {
        RuleType::SignaturePattern => signature::compile(&rule.content).map(|_| ()),
        RuleType::StructuredDetection => structured::compile(&rule.content).map(|_| ()),
        RuleType::ObjectPattern => object::compile(&rule.content).map(|_| ()),
        RuleType::Custom => Ok(()),
    };
    match compiled {
        Ok(()) => ValidationResult::default(),
        Err(e) => ValidationResult {
            errors: vec![e.to_string()],
            warnings: vec![],
        },
    }
}

fn evaluate_signature(rule: &Rule, events: &[LogEvent], raw_content: &str) -> Result<Option<RuleMatch>, RuleEngineError> {
    let compiled = signature::compile_with_id(rule.id, &rule.content)?;
    Ok(signature::evaluate(rule, &compiled, events, raw_content))
}

fn evaluate_structured(rule: &Rule, events: &[LogEvent]) -> Result<Option<RuleMatch>, RuleEngineError> {
    let compiled = structured::compile_with_id(rule.id, &rule.content)?;
    Ok(structured::evaluate(rule, &compiled, events))
}

fn evaluate_object(rule: &Rule, events: &[LogEvent], raw_content: &str) -> Result<Option<RuleMatch>, RuleEngineError> {
    let compiled = object::compile_with_id(rule.id, &rule.content)?;
    Ok(object::evaluate(rule, &compiled, events, raw_content, Utc::now()))
}

/// Run a group of same-dialect rules, isolating each rule's failure from
/// the rest (spec §4.D.1 "one processor's exception does not abort the
/// others"; §4.D top-level "compilation failure per-rule is reported but
/// does not abort other rules"). Catches unwinds too, since a single
/// rule's evaluation must never take the whole group down.
fn run_group<F>(rules: &[&Rule], outcome: &mut DispatchOutcome, eval: F)
where
    F: Fn(&Rule) -> Result<Option<RuleMatch>, RuleEngineError>,
{
    for rule in rules {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| eval(rule)));
        match result {
            Ok(Ok(Some(m))) => outcome.matches.push(m),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => outcome.failures.push(RuleFailure {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                error: e,
            }),
            Err(_) => outcome.failures.push(RuleFailure {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                error: RuleEngineError::Processing(format!("processor panicked evaluating rule `{}`", rule.name)),
            }),
        }
    }
}

/// Group rules by dialect, evaluate each group against `events` and
/// `raw_content`, and aggregate per-rule match-count/last-matched stats
/// back through `persistence` (spec §4.D.1). Rule-type groups are
/// processed sequentially; ordering of `matches` across rules is
/// unspecified (spec §5).
pub async fn process(
    events: &[LogEvent],
    raw_content: &str,
    rules: &[Rule],
    custom_processor: Option<&dyn CustomRuleProcessor>,
    persistence: &dyn PersistencePort,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();

    let enabled: Vec<&Rule> = rules.iter().filter(|r| r.enabled).collect();

    let signature_rules: Vec<&Rule> = enabled.iter().copied().filter(|r| r.rule_type == RuleType::SignaturePattern).collect();
    run_group(&signature_rules, &mut outcome, |r| evaluate_signature(r, events, raw_content));

    let structured_rules: Vec<&Rule> = enabled.iter().copied().filter(|r| r.rule_type == RuleType::StructuredDetection).collect();
    run_group(&structured_rules, &mut outcome, |r| evaluate_structured(r, events));

    let object_rules: Vec<&Rule> = enabled.iter().copied().filter(|r| r.rule_type == RuleType::ObjectPattern).collect();
    run_group(&object_rules, &mut outcome, |r| evaluate_object(r, events, raw_content));

    let custom_rules: Vec<&Rule> = enabled.iter().copied().filter(|r| r.rule_type == RuleType::Custom).collect();
    if let Some(processor) = custom_processor {
        for rule in custom_rules {
            match processor.process(rule, events, raw_content).await {
                Ok(Some(m)) => outcome.matches.push(m),
                Ok(None) => {}
                Err(e) => outcome.failures.push(RuleFailure {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    error: e,
                }),
            }
        }
    } else {
        for rule in custom_rules {
            outcome.failures.push(RuleFailure {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                error: RuleEngineError::Processing("no custom rule processor registered".to_string()),
            });
        }
    }

    let now = Utc::now();
    for m in &outcome.matches {
        let _ = persistence
            .update_rule_stats(m.rule_id, m.match_count as u64, now)
            .await;
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_common::model::Severity;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct NoopPersistence {
        stats: Mutex<Vec<(Uuid, u64)>>,
    }

    #[async_trait::async_trait]
    impl PersistencePort for NoopPersistence {
        async fn save_analysis(&self, _analysis: &security_common::model::Analysis) -> Result<(), String> {
            Ok(())
        }
        async fn load_analysis(&self, _id: Uuid) -> Result<Option<security_common::model::Analysis>, String> {
            Ok(None)
        }
        async fn list_analyses(&self) -> Result<Vec<security_common::model::Analysis>, String> {
            Ok(vec![])
        }
        async fn save_rule(&self, _rule: &Rule) -> Result<(), String> {
            Ok(())
        }
        async fn list_rules(&self) -> Result<Vec<Rule>, String> {
            Ok(vec![])
        }
        async fn save_matches(&self, _analysis_id: Uuid, _matches: &[RuleMatch]) -> Result<(), String> {
            Ok(())
        }
        async fn save_iocs(&self, _analysis_id: Uuid, _iocs: &[security_common::model::Ioc]) -> Result<(), String> {
            Ok(())
        }
        async fn save_techniques(&self, _analysis_id: Uuid, _techniques: &[security_common::model::Technique]) -> Result<(), String> {
            Ok(())
        }
        async fn update_rule_stats(&self, rule_id: Uuid, delta_matches: u64, _last_matched: chrono::DateTime<Utc>) -> Result<(), String> {
            self.stats.lock().unwrap().push((rule_id, delta_matches));
            Ok(())
        }
    }

    fn event(raw: &str) -> LogEvent {
        LogEvent {
            line_number: 1,
            raw_text: raw.to_string(),
            timestamp: None,
            level: "info".to_string(),
            source: "test".to_string(),
            message: raw.to_string(),
            fields: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn mixed_dialect_rules_all_run_and_one_bad_rule_is_isolated() {
        let good_sig = Rule::new(
            RuleType::SignaturePattern,
            "good",
            r#"rule Evil { strings: { $a = "evil" } condition: any of them }"#,
            Severity::High,
        )
        .unwrap();
        let bad_sig = Rule::new(RuleType::SignaturePattern, "bad", "not a rule", Severity::Low).unwrap();
        let rules = vec![good_sig.clone(), bad_sig.clone()];
        let persistence = NoopPersistence { stats: Mutex::new(vec![]) };

        let outcome = process(&[event("benign evil benign")], "benign evil benign", &rules, None, &persistence).await;

        assert_eq!(outcome.matches.len(), 1);
        assert_eq!(outcome.matches[0].rule_id, good_sig.id);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].rule_id, bad_sig.id);
        assert_eq!(persistence.stats.lock().unwrap().len(), 1);
    }

    #[test]
    fn validate_is_idempotent() {
        let rule = Rule::new(RuleType::SignaturePattern, "r", "not a rule", Severity::Low).unwrap();
        let first = validate(&rule);
        let second = validate(&rule);
        assert_eq!(first, second);
    }

    #[test]
    fn validate_rejects_empty_content() {
        let mut rule = Rule::new(RuleType::SignaturePattern, "r", "placeholder", Severity::Low).unwrap();
        rule.content = "   ".to_string();
        let result = validate(&rule);
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("empty"));
    }

    #[test]
    fn validate_structured_rejects_undefined_selection() {
        let doc = "detection:\n  a:\n    field: \"1\"\n  condition: missing_selection\n";
        let rule = Rule::new(RuleType::StructuredDetection, "r", doc, Severity::Low).unwrap();
        // Unknown selection names evaluate false at runtime (spec §4.D.3), not
        // a compile error; compilation itself should still succeed here.
        assert!(validate(&rule).is_valid());
    }

    #[test]
    fn yara_rule_with_unbalanced_braces_fails_validation() {
        let rule = Rule::new(RuleType::SignaturePattern, "r", "rule Evil { strings: { $a = \"x\" } condition: any of them", Severity::Low).unwrap();
        assert!(!validate(&rule).is_valid());
    }
}
