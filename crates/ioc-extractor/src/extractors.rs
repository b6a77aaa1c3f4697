//! The nine extractor classes (spec §4.C), each scanning one haystack and
//! returning raw candidates still awaiting acceptance/confidence rules.

use crate::patterns::*;
use security_common::model::IocType;

/// A raw regex hit before acceptance rules and confidence scoring.
pub struct RawHit {
    pub ioc_type: IocType,
    pub value: String,
    pub context: String,
}

fn context_window(haystack: &str, start: usize, end: usize) -> String {
    let lo = haystack.char_indices().rev().find(|(i, _)| *i <= start.saturating_sub(50)).map(|(i, _)| i).unwrap_or(0);
    let hi = haystack.char_indices().find(|(i, _)| *i >= end + 50).map(|(i, _)| i).unwrap_or(haystack.len());
    haystack.get(lo..hi).unwrap_or(haystack).to_string()
}

fn domain_whitelisted(domain: &str, whitelist: &[String]) -> bool {
    whitelist.iter().any(|w| domain == w || domain.ends_with(&format!(".{w}")))
}

pub fn scan_ip(haystack: &str) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for m in IPV4.find_iter(haystack) {
        let value = m.as_str().to_string();
        if FP_IPV4.contains(&value.as_str()) || value.starts_with("255.") || value.starts_with("127.") {
            continue;
        }
        hits.push(RawHit {
            ioc_type: IocType::Ipv4,
            value,
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    for m in IPV6.find_iter(haystack) {
        let value = m.as_str().to_string();
        if value == "::1" || value == "::" {
            continue;
        }
        hits.push(RawHit {
            ioc_type: IocType::Ipv6,
            value,
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    hits
}

pub fn scan_domain(haystack: &str, whitelist: &[String]) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for m in DOMAIN.find_iter(haystack) {
        let value = m.as_str().to_string();
        if value.len() > 253 || value.split('.').any(|label| label.len() > 63) {
            continue;
        }
        let tld = value.rsplit('.').next().unwrap_or("").to_lowercase();
        if SUSPICIOUS_TLDS.contains(&tld.as_str()) {
            continue;
        }
        if domain_whitelisted(&value.to_lowercase(), whitelist) {
            continue;
        }
        // Avoid matching a dotted-quad as a "domain" too.
        if value.split('.').all(|p| p.chars().all(|c| c.is_ascii_digit())) {
            continue;
        }
        hits.push(RawHit {
            ioc_type: IocType::Domain,
            value,
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    hits
}

pub fn scan_url(haystack: &str, whitelist: &[String]) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for m in URL.find_iter(haystack) {
        let value = m.as_str().trim_end_matches(|c: char| ".,;)".contains(c)).to_string();
        let host = value
            .split("://")
            .nth(1)
            .and_then(|rest| rest.split(['/', '?', '#']).next())
            .unwrap_or("")
            .to_lowercase();
        let host = host.split(':').next().unwrap_or(&host).to_string();
        if host.is_empty() || domain_whitelisted(&host, whitelist) {
            continue;
        }
        hits.push(RawHit {
            ioc_type: IocType::Url,
            value,
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    hits
}

pub fn scan_email(haystack: &str, whitelist: &[String]) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for m in EMAIL.find_iter(haystack) {
        let value = m.as_str().to_string();
        let domain = value.rsplit('@').next().unwrap_or("").to_lowercase();
        if domain_whitelisted(&domain, whitelist) {
            continue;
        }
        hits.push(RawHit {
            ioc_type: IocType::Email,
            value,
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    hits
}

fn is_degenerate_hash(hex: &str) -> bool {
    let lower = hex.to_lowercase();
    if lower.chars().all(|c| c == lower.chars().next().unwrap()) {
        return true;
    }
    if lower.len().is_multiple_of(4) {
        let prefix = &lower[..4];
        let repeats = lower.as_bytes().chunks(4).filter(|c| *c == prefix.as_bytes()).count();
        let total_chunks = lower.len() / 4;
        if total_chunks > 0 && (repeats as f64 / total_chunks as f64) > 0.75 {
            return true;
        }
    }
    false
}

const EMPTY_FILE_HASHES: &[&str] = &[
    "d41d8cd98f00b204e9800998ecf8427e", // md5("")
    "da39a3ee5e6b4b0d3255bfef95601890afd80709", // sha1("")
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855", // sha256("")
];

pub fn scan_hash(haystack: &str) -> Vec<RawHit> {
    let mut hits = Vec::new();
    let specs: [(&regex::Regex, IocType); 4] = [
        (&SHA512, IocType::Sha512),
        (&SHA256, IocType::Sha256),
        (&SHA1, IocType::Sha1),
        (&MD5, IocType::Md5),
    ];
    let mut claimed: Vec<(usize, usize)> = Vec::new();
    for (re, ioc_type) in specs {
        for m in re.find_iter(haystack) {
            if claimed.iter().any(|(s, e)| m.start() >= *s && m.end() <= *e) {
                continue;
            }
            let value = m.as_str().to_string();
            if EMPTY_FILE_HASHES.contains(&value.to_lowercase().as_str()) || is_degenerate_hash(&value) {
                continue;
            }
            claimed.push((m.start(), m.end()));
            hits.push(RawHit {
                ioc_type,
                value,
                context: context_window(haystack, m.start(), m.end()),
            });
        }
    }
    hits
}

pub fn scan_file_path(haystack: &str) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for m in FILE_PATH.find_iter(haystack) {
        let value = m.as_str().to_string();
        let lower = value.to_lowercase();
        let suspicious_dir = SUSPICIOUS_DIRS.iter().any(|d| lower.contains(d));
        let executable = EXECUTABLE_EXTENSIONS.iter().any(|e| lower.ends_with(e));
        if !suspicious_dir && !executable {
            continue;
        }
        hits.push(RawHit {
            ioc_type: IocType::FilePath,
            value,
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    hits
}

pub fn scan_registry(haystack: &str) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for m in REGISTRY_KEY.find_iter(haystack) {
        hits.push(RawHit {
            ioc_type: IocType::RegistryKey,
            value: m.as_str().to_string(),
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    hits
}

pub fn scan_crypto(haystack: &str) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for m in BITCOIN.find_iter(haystack) {
        hits.push(RawHit {
            ioc_type: IocType::BitcoinAddress,
            value: m.as_str().to_string(),
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    for m in ETHEREUM.find_iter(haystack) {
        hits.push(RawHit {
            ioc_type: IocType::EthereumAddress,
            value: m.as_str().to_string(),
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    for m in CVE.find_iter(haystack) {
        hits.push(RawHit {
            ioc_type: IocType::Cve,
            value: m.as_str().to_uppercase(),
            context: context_window(haystack, m.start(), m.end()),
        });
    }
    hits
}

/// Ports and other small network artifacts (spec §4.C "network
/// artifacts" class).
pub fn scan_network_artifact(haystack: &str) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for caps in PORT_CONTEXT.captures_iter(haystack) {
        let m = caps.get(1).unwrap();
        if let Ok(port) = m.as_str().parse::<u32>() {
            if port <= 65535 {
                hits.push(RawHit {
                    ioc_type: IocType::Port,
                    value: port.to_string(),
                    context: context_window(haystack, m.start(), m.end()),
                });
            }
        }
    }
    hits
}
