//! Confidence scoring (spec §4.C).

use crate::patterns::{BENIGN_KEYWORDS, MALICIOUS_KEYWORDS};
use security_common::model::IocType;

pub fn base_confidence(ioc_type: IocType) -> i32 {
    match ioc_type {
        IocType::Domain => 60,
        IocType::Ipv4 | IocType::Ipv6 => 70,
        IocType::Url => 65,
        IocType::Email => 55,
        IocType::Md5 | IocType::Sha1 | IocType::Sha256 | IocType::Sha512 => 80,
        IocType::FilePath => 50,
        IocType::RegistryKey => 55,
        IocType::BitcoinAddress | IocType::EthereumAddress => 90,
        IocType::Cve => 95,
        IocType::Port => 40,
    }
}

pub fn context_is_malicious(context: &str) -> bool {
    let lower = context.to_lowercase();
    MALICIOUS_KEYWORDS.iter().any(|k| lower.contains(k))
}

pub fn context_is_benign(context: &str) -> bool {
    let lower = context.to_lowercase();
    BENIGN_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Recomputable confidence score given the accumulated evidence for one
/// deduplicated IOC, clamped to [10, 100] (spec §4.C "Confidence").
pub fn score(
    ioc_type: IocType,
    occurrences: u32,
    malicious_context_seen: bool,
    benign_context_seen: bool,
    is_private_ip: bool,
    tld_risky: bool,
) -> u8 {
    let mut score = base_confidence(ioc_type);
    score += (3 * occurrences as i32).min(15);

    if malicious_context_seen {
        score += 15;
    }
    if tld_risky {
        score += 20;
    }
    if benign_context_seen {
        score -= 20;
    }
    if is_private_ip {
        score -= 30;
    }

    score.clamp(10, 100) as u8
}
