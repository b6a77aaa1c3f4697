//! IOC Extractor (spec §4.C): concurrent multi-pattern scanner with
//! dedup, whitelisting, context capture, and confidence scoring.

pub mod canonical;
pub mod confidence;
pub mod extractors;
pub mod patterns;

use chrono::{DateTime, Utc};
use security_common::model::{Ioc, IocType, LogEvent};
use std::collections::HashMap;
use std::sync::Arc;

/// Tunables for one extraction run (spec §4.C "configurable threshold").
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub confidence_threshold: u8,
    pub domain_whitelist: Vec<String>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 30,
            domain_whitelist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ExtractorKind {
    Ip,
    Domain,
    Url,
    Email,
    Hash,
    FilePath,
    Registry,
    Crypto,
    NetworkArtifact,
}

const ALL_KINDS: [ExtractorKind; 9] = [
    ExtractorKind::Ip,
    ExtractorKind::Domain,
    ExtractorKind::Url,
    ExtractorKind::Email,
    ExtractorKind::Hash,
    ExtractorKind::FilePath,
    ExtractorKind::Registry,
    ExtractorKind::Crypto,
    ExtractorKind::NetworkArtifact,
];

struct Haystack {
    text: String,
    at: DateTime<Utc>,
}

fn collect_haystacks(events: &[LogEvent], raw_content: &str) -> Vec<Haystack> {
    let now = Utc::now();
    let mut haystacks = vec![Haystack {
        text: raw_content.to_string(),
        at: now,
    }];
    for event in events {
        let at = event.timestamp.unwrap_or(now);
        haystacks.push(Haystack {
            text: event.raw_text.clone(),
            at,
        });
        haystacks.push(Haystack {
            text: event.message.clone(),
            at,
        });
        for value in event.fields.values() {
            if let Some(text) = value.as_text() {
                haystacks.push(Haystack { text, at });
            }
        }
    }
    haystacks
}

fn run_kind(kind: ExtractorKind, haystacks: &[Haystack], whitelist: &[String]) -> Vec<(extractors::RawHit, DateTime<Utc>)> {
    let mut out = Vec::new();
    for h in haystacks {
        let hits = match kind {
            ExtractorKind::Ip => extractors::scan_ip(&h.text),
            ExtractorKind::Domain => extractors::scan_domain(&h.text, whitelist),
            ExtractorKind::Url => extractors::scan_url(&h.text, whitelist),
            ExtractorKind::Email => extractors::scan_email(&h.text, whitelist),
            ExtractorKind::Hash => extractors::scan_hash(&h.text),
            ExtractorKind::FilePath => extractors::scan_file_path(&h.text),
            ExtractorKind::Registry => extractors::scan_registry(&h.text),
            ExtractorKind::Crypto => extractors::scan_crypto(&h.text),
            ExtractorKind::NetworkArtifact => extractors::scan_network_artifact(&h.text),
        };
        out.extend(hits.into_iter().map(|hit| (hit, h.at)));
    }
    out
}

struct DedupEntry {
    ioc: Ioc,
    occurrences: u32,
    malicious_seen: bool,
    benign_seen: bool,
    is_private: bool,
    tld_risky: bool,
}

/// Scan `raw_content` and every event's text for IOCs (spec §4.C
/// `extract`). The nine extractor classes run concurrently; ordering of
/// the result is not part of the contract (spec §5).
pub async fn extract(events: &[LogEvent], raw_content: &str, config: &ExtractorConfig) -> Vec<Ioc> {
    if events.is_empty() && raw_content.trim().is_empty() {
        return Vec::new();
    }

    let haystacks = Arc::new(collect_haystacks(events, raw_content));
    let whitelist = Arc::new(config.domain_whitelist.clone());

    let mut join_set = tokio::task::JoinSet::new();
    for kind in ALL_KINDS {
        let haystacks = Arc::clone(&haystacks);
        let whitelist = Arc::clone(&whitelist);
        join_set.spawn_blocking(move || run_kind(kind, &haystacks, &whitelist));
    }

    let mut dedup: HashMap<(IocType, String), DedupEntry> = HashMap::new();
    while let Some(joined) = join_set.join_next().await {
        let Ok(hits) = joined else { continue };
        for (hit, at) in hits {
            let canonical = canonical::canonicalize(hit.ioc_type, &hit.value);
            let is_private = hit.ioc_type == IocType::Ipv4 && patterns::is_private_ipv4(&hit.value);
            let tld_risky = hit.ioc_type == IocType::Domain && domain_tld_is_risky(&canonical);
            let malicious = confidence::context_is_malicious(&hit.context);
            let benign = confidence::context_is_benign(&hit.context);

            let key = (hit.ioc_type, canonical.clone());
            let entry = dedup.entry(key).or_insert_with(|| {
                let mut ioc = Ioc::new(canonical.clone(), hit.ioc_type, 10, hit.context.clone());
                ioc.first_seen = at;
                ioc.last_seen = at;
                DedupEntry {
                    ioc,
                    occurrences: 0,
                    malicious_seen: false,
                    benign_seen: false,
                    is_private,
                    tld_risky,
                }
            });
            entry.occurrences += 1;
            entry.malicious_seen |= malicious;
            entry.benign_seen |= benign;
            entry.ioc.widen(at);
            entry.ioc.confidence = confidence::score(
                hit.ioc_type,
                entry.occurrences,
                entry.malicious_seen,
                entry.benign_seen,
                entry.is_private,
                entry.tld_risky,
            );
        }
    }

    dedup
        .into_values()
        .map(|entry| entry.ioc)
        .filter(|ioc| ioc.confidence >= config.confidence_threshold)
        .collect()
}

fn domain_tld_is_risky(domain: &str) -> bool {
    const RISKY_TLDS: &[&str] = &["ru", "cn", "tk", "top", "xyz", "biz"];
    domain
        .rsplit('.')
        .next()
        .map(|tld| RISKY_TLDS.contains(&tld))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_input_yields_empty_list() {
        let iocs = extract(&[], "", &ExtractorConfig::default()).await;
        assert!(iocs.is_empty());
    }

    #[tokio::test]
    async fn duplicate_ip_collapses_to_one_ioc() {
        let raw = "hit 8.8.8.8 and 8.8.8.8 again";
        let iocs = extract(&[], raw, &ExtractorConfig::default()).await;
        let matches: Vec<_> = iocs.iter().filter(|i| i.value == "8.8.8.8").collect();
        assert_eq!(matches.len(), 1);
        let ioc = matches[0];
        assert_eq!(ioc.first_seen, ioc.last_seen);
        assert!(ioc.confidence >= 70);
    }

    #[tokio::test]
    async fn private_ip_confidence_is_reduced() {
        let raw = "connection from 192.168.1.50 refused";
        let iocs = extract(&[], raw, &ExtractorConfig::default()).await;
        let ioc = iocs.iter().find(|i| i.value == "192.168.1.50").unwrap();
        assert!(ioc.confidence <= 70 - 30 + 15); // base 70 minus private penalty plus occurrence bonus ceiling
    }

    #[tokio::test]
    async fn sha256_hash_is_detected() {
        let raw = "payload hash: a0cf1ad3634fe82b2085fd6a539799f9bfcbdbe0ab0a901ee6c5452aef03a599";
        let iocs = extract(&[], raw, &ExtractorConfig::default()).await;
        assert!(iocs.iter().any(|i| i.ioc_type == IocType::Sha256));
    }

    #[tokio::test]
    async fn internal_tld_domain_is_rejected() {
        let raw = "connecting to host.internal now";
        let iocs = extract(&[], raw, &ExtractorConfig::default()).await;
        assert!(!iocs.iter().any(|i| i.ioc_type == IocType::Domain));
    }

    #[tokio::test]
    async fn low_confidence_iocs_are_dropped_below_threshold() {
        let raw = "port: 8080 used for local testing";
        let mut config = ExtractorConfig::default();
        config.confidence_threshold = 95;
        let iocs = extract(&[], raw, &config).await;
        assert!(iocs.iter().all(|i| i.confidence >= 95));
    }
}
