//! Final threat score (spec §4.F "Threat score"): the mean of a rule
//! component and an IOC component, each normalized by its own count,
//! capped at 100.

use security_common::model::{Ioc, IocType, RuleMatch, Severity};

fn ioc_type_multiplier(ioc_type: IocType) -> f64 {
    match ioc_type {
        IocType::Md5 | IocType::Sha1 | IocType::Sha256 | IocType::Sha512 => 2.0,
        _ => 1.0,
    }
}

fn ioc_is_malicious(ioc: &Ioc) -> bool {
    ioc.tags.iter().any(|t| t.eq_ignore_ascii_case("malicious"))
}

fn rule_score(matches: &[RuleMatch]) -> Option<f64> {
    if matches.is_empty() {
        return None;
    }
    let total_match_count: usize = matches.iter().map(|m| m.match_count).sum();
    if total_match_count == 0 {
        return None;
    }
    let weighted: f64 = matches
        .iter()
        .map(|m| m.severity.weight() * m.confidence * m.match_count as f64)
        .sum();
    Some(weighted / total_match_count as f64)
}

fn ioc_score(iocs: &[Ioc]) -> Option<f64> {
    if iocs.is_empty() {
        return None;
    }
    let total: f64 = iocs
        .iter()
        .map(|ioc| {
            let base = if ioc_is_malicious(ioc) { 75.0 } else { 25.0 };
            base * ioc_type_multiplier(ioc.ioc_type) * (ioc.confidence as f64 / 100.0)
        })
        .sum();
    Some(total / iocs.len() as f64)
}

/// Combine the rule and IOC components into a single `[0, 100]` score
/// (spec §4.F). When only one component is available the score is that
/// component; when neither is, the score is 0.
pub fn threat_score(matches: &[RuleMatch], iocs: &[Ioc]) -> f64 {
    let rule = rule_score(matches);
    let ioc = ioc_score(iocs);
    let score = match (rule, ioc) {
        (Some(r), Some(i)) => (r + i) / 2.0,
        (Some(r), None) => r,
        (None, Some(i)) => i,
        (None, None) => 0.0,
    };
    score.min(100.0)
}

pub fn severity_for_score(score: f64) -> Severity {
    Severity::from_threat_score(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_common::model::{MatchDetail, RuleType};
    use std::collections::HashMap;
    use uuid::Uuid;

    fn rule_match(severity: Severity, confidence: f64, match_count: usize) -> RuleMatch {
        RuleMatch {
            rule_id: Uuid::new_v4(),
            rule_type: RuleType::SignaturePattern,
            severity,
            match_count,
            confidence,
            details: vec![MatchDetail {
                matched_content: String::new(),
                file_offset: None,
                line_number: None,
                context: String::new(),
                fields: HashMap::new(),
            }],
            mitre_attack_ids: vec![],
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn scenario_six_threat_score_composition() {
        let matches = vec![rule_match(Severity::High, 0.8, 2)];
        let iocs = vec![
            Ioc::new("aaaa", IocType::Sha256, 100, ""),
            Ioc::new("bbbb", IocType::Sha256, 100, ""),
        ];

        assert_eq!(rule_score(&matches), Some(60.0));
        assert_eq!(ioc_score(&iocs), Some(50.0));

        let score = threat_score(&matches, &iocs);
        assert!((score - 55.0).abs() < 1e-9);
        assert_eq!(severity_for_score(score), Severity::Medium);
    }

    #[test]
    fn no_evidence_scores_zero() {
        assert_eq!(threat_score(&[], &[]), 0.0);
    }
}
