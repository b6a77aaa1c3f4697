//! Attack-chain identification (spec §4.E): predefined chain patterns
//! match when at least 2 of their 3 required technique ids are present
//! among the mapped techniques.

/// One predefined kill-chain pattern and the technique ids that make it
/// up.
pub struct ChainPattern {
    pub name: &'static str,
    pub required: &'static [&'static str],
}

const CHAINS: &[ChainPattern] = &[
    ChainPattern { name: "Phishing -> Execution -> Impact", required: &["T1566", "T1204", "T1486"] },
    ChainPattern { name: "Initial Access -> Persistence -> Command and Control", required: &["T1078", "T1547", "T1071"] },
    ChainPattern { name: "Discovery -> Lateral Movement -> Exfiltration", required: &["T1082", "T1021", "T1041"] },
];

/// A chain pattern with enough of its required techniques present (spec
/// §4.E "chain confidence = matched/required").
#[derive(Debug, Clone, PartialEq)]
pub struct AttackChainMatch {
    pub name: &'static str,
    pub matched: usize,
    pub required: usize,
    pub confidence: f64,
}

/// Match `present_technique_ids` against every predefined chain pattern.
pub fn identify_chains(present_technique_ids: &[String]) -> Vec<AttackChainMatch> {
    CHAINS
        .iter()
        .filter_map(|chain| {
            let matched = chain.required.iter().filter(|id| present_technique_ids.iter().any(|p| p == *id)).count();
            if matched * 3 >= chain.required.len() * 2 {
                Some(AttackChainMatch {
                    name: chain.name,
                    matched,
                    required: chain.required.len(),
                    confidence: matched as f64 / chain.required.len() as f64,
                })
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_of_three_techniques_triggers_chain() {
        let present = vec!["T1566".to_string(), "T1204".to_string()];
        let chains = identify_chains(&present);
        assert_eq!(chains.len(), 1);
        assert_eq!(chains[0].matched, 2);
        assert!((chains[0].confidence - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn one_of_three_does_not_trigger_chain() {
        let present = vec!["T1566".to_string()];
        assert!(identify_chains(&present).is_empty());
    }
}
