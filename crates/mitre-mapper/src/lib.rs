//! MITRE Mapper (spec §4.E): correlates rule matches, IOCs, and textual
//! evidence into MITRE ATT&CK technique ids, attack chains, a
//! sophistication score, and threat-group attribution.

pub mod chains;
pub mod error;
pub mod kb;
pub mod mappers;

use std::collections::{HashMap, HashSet};

use security_common::model::{Ioc, RuleMatch, Severity, Technique};

pub use chains::AttackChainMatch;
pub use error::MitreError;
pub use kb::{MitreKnowledgeBase, TechniqueRecord, ThreatGroupRecord};

/// A scored threat-group attribution (spec §4.E "top 5").
#[derive(Debug, Clone, PartialEq)]
pub struct GroupAttribution {
    pub name: &'static str,
    pub score: f64,
}

/// Full output of one mapping pass (spec §4.E "Outputs").
#[derive(Debug, Clone)]
pub struct MappingResult {
    pub techniques: Vec<Technique>,
    pub chains: Vec<AttackChainMatch>,
    pub sophistication_score: u8,
    pub attributions: Vec<GroupAttribution>,
}

const HIGH_CONFIDENCE_THRESHOLD: u8 = 70;

fn corpus(evidence_text: &str, rule_matches: &[RuleMatch]) -> String {
    let mut text = evidence_text.to_string();
    for m in rule_matches {
        for detail in &m.details {
            text.push(' ');
            text.push_str(&detail.matched_content);
            text.push(' ');
            text.push_str(&detail.context);
        }
    }
    text
}

/// Run the eight evidence mappers and merge their proposals into a
/// ranked [`Technique`] list plus the derived chain/sophistication/
/// attribution outputs (spec §4.E `Algorithm`).
pub fn map(
    kb: &MitreKnowledgeBase,
    rule_matches: &[RuleMatch],
    iocs: &[Ioc],
    evidence_text: &str,
    file_extension: &str,
    _threat_level: Severity,
) -> MappingResult {
    let corpus = corpus(evidence_text, rule_matches);

    let sources: Vec<Vec<mappers::Candidate>> = vec![
        mappers::from_iocs(iocs),
        mappers::from_behavior_regexes(&corpus),
        mappers::from_artifacts(file_extension),
        mappers::from_file_ops(&corpus),
        mappers::from_network_activity(iocs, &corpus),
        mappers::from_persistence(&corpus),
        mappers::from_defense_evasion(&corpus),
        mappers::from_command_and_control(iocs, &corpus),
    ];

    // Rule matches that already carry declared MITRE ids are treated as
    // direct, high-confidence evidence from the behavior-regex source.
    let mut direct_from_rules = Vec::new();
    for m in rule_matches {
        for id in &m.mitre_attack_ids {
            direct_from_rules.push(mappers::Candidate { technique_id: leak_id(id), confidence: 85 });
        }
    }

    // Merge: base confidence is the strongest single proposal for an id;
    // +10 per *additional distinct mapper* that also proposed it, capped
    // at 100 (spec §4.E).
    let mut best_confidence: HashMap<&'static str, u8> = HashMap::new();
    let mut proposing_mappers: HashMap<&'static str, HashSet<usize>> = HashMap::new();

    for (mapper_index, candidates) in sources.iter().chain(std::iter::once(&direct_from_rules)).enumerate() {
        for c in candidates {
            best_confidence
                .entry(c.technique_id)
                .and_modify(|b| *b = (*b).max(c.confidence))
                .or_insert(c.confidence);
            proposing_mappers.entry(c.technique_id).or_default().insert(mapper_index);
        }
    }

    let mut techniques: Vec<Technique> = Vec::new();
    for (id, base) in &best_confidence {
        let extra = 10u32 * (proposing_mappers[id].len() as u32 - 1);
        let confidence = (*base as u32 + extra).min(100) as u8;
        if let Some(record) = kb.technique(id) {
            if let Ok(t) = Technique::new(record.id, record.tactic, record.platform, record.description, confidence) {
                techniques.push(t);
            }
        }
    }
    techniques.sort_by(|a, b| b.confidence.cmp(&a.confidence).then_with(|| a.id.cmp(&b.id)));

    let present_ids: Vec<String> = techniques.iter().map(|t| t.id.clone()).collect();
    let chain_matches = chains::identify_chains(&present_ids);

    let sophistication_score = sophistication_score(kb, &techniques);
    let attributions = attribute_groups(kb, &techniques);

    MappingResult {
        techniques,
        chains: chain_matches,
        sophistication_score,
        attributions,
    }
}

/// Leak a short-lived owned string into a `'static str` slot sized for
/// MITRE technique ids (bounded, always `T\d{4}(\.\d{3})?`). Declared
/// rule MITRE ids are already validated at rule-construction time; this
/// only needs to match identical ids for dedup, so leaking is bounded by
/// the number of distinct ids a single analysis can ever declare.
fn leak_id(id: &str) -> &'static str {
    Box::leak(id.to_string().into_boxed_str())
}

fn sophistication_score(kb: &MitreKnowledgeBase, techniques: &[Technique]) -> u8 {
    let mut score = 0u32;
    let mut tactics = HashSet::new();
    for t in techniques {
        if let Some(record) = kb.technique(&t.id) {
            if record.advanced {
                score += 10;
            }
            tactics.insert(record.tactic);
        }
        if t.confidence >= HIGH_CONFIDENCE_THRESHOLD {
            score += 3;
        }
    }
    score += 5 * tactics.len() as u32;
    score.min(100) as u8
}

fn attribute_groups(kb: &MitreKnowledgeBase, techniques: &[Technique]) -> Vec<GroupAttribution> {
    let by_id: HashMap<&str, u8> = techniques.iter().map(|t| (t.id.as_str(), t.confidence)).collect();
    let mut scored: Vec<GroupAttribution> = kb
        .groups()
        .into_iter()
        .map(|group| {
            let matched: Vec<u8> = group.techniques.iter().filter_map(|id| by_id.get(id).copied()).collect();
            let coverage = matched.len() as f64 / group.techniques.len() as f64;
            let weight: f64 = matched.iter().map(|c| *c as f64).sum();
            GroupAttribution { name: group.name, score: weight * coverage }
        })
        .filter(|a| a.score > 0.0)
        .collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
    scored.truncate(5);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use security_common::model::{IocType, RuleType};
    use std::collections::HashMap as Map;

    fn ioc(value: &str, ioc_type: IocType) -> Ioc {
        Ioc::new(value, ioc_type, 80, "")
    }

    #[test]
    fn technique_ids_always_match_the_mitre_pattern() {
        let kb = MitreKnowledgeBase::new();
        let result = map(&kb, &[], &[ioc("1.2.3.4", IocType::Ipv4)], "", "", Severity::Medium);
        let re = regex::Regex::new(r"^T\d{4}(\.\d{3})?$").unwrap();
        for t in &result.techniques {
            assert!(re.is_match(&t.id), "bad id {}", t.id);
        }
    }

    #[test]
    fn multiple_mappers_agreeing_raise_confidence_above_single_source() {
        let kb = MitreKnowledgeBase::new();
        // IOC mapper + C2 keyword mapper both nominate T1071.
        let result = map(
            &kb,
            &[],
            &[ioc("evil.example.com", IocType::Domain), ioc("http://evil.example.com/x", IocType::Url)],
            "command and control beacon observed",
            "",
            Severity::High,
        );
        let t1071 = result.techniques.iter().find(|t| t.id == "T1071").unwrap();
        assert!(t1071.confidence > 50);
    }

    #[test]
    fn chain_and_attribution_and_sophistication_are_populated_for_rich_evidence() {
        let kb = MitreKnowledgeBase::new();
        let mut rule_match = RuleMatch {
            rule_id: uuid::Uuid::new_v4(),
            rule_type: RuleType::SignaturePattern,
            severity: Severity::Critical,
            match_count: 1,
            confidence: 0.9,
            details: vec![],
            mitre_attack_ids: vec!["T1566".to_string(), "T1204".to_string()],
            metadata: Map::new(),
        };
        rule_match.details.push(security_common::model::MatchDetail {
            matched_content: "files were encrypted".to_string(),
            file_offset: None,
            line_number: None,
            context: "ransom note dropped".to_string(),
            fields: Map::new(),
        });

        let result = map(&kb, &[rule_match], &[], "", "", Severity::Critical);
        assert!(result.techniques.iter().any(|t| t.id == "T1486"));
        assert!(!result.chains.is_empty());
        assert!(result.sophistication_score > 0);
    }
}
