//! Compiled-once regex patterns and constant lookup tables (spec §4.C).
//!
//! The teacher's own `parsers::generic` recompiles a `Regex` on every
//! call; we correct that here by compiling each pattern exactly once
//! behind a `LazyLock`, since the extractor runs these patterns over
//! every line of every analysis (see DESIGN.md).

use regex::Regex;
use std::sync::LazyLock;

pub static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b").unwrap()
});

pub static IPV6: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[A-Fa-f0-9]{1,4}:){2,7}[A-Fa-f0-9]{1,4}\b|\b::1\b|\b::\b").unwrap()
});

pub static DOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,24}\b").unwrap()
});

pub static URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\b(?:https?|ftps?)://[^\s'"<>]+"#).unwrap()
});

pub static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,24}\b").unwrap()
});

pub static MD5: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[a-fA-F0-9]{32}\b").unwrap());
pub static SHA1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[a-fA-F0-9]{40}\b").unwrap());
pub static SHA256: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[a-fA-F0-9]{64}\b").unwrap());
pub static SHA512: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[a-fA-F0-9]{128}\b").unwrap());

pub static FILE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:[A-Za-z]:\\(?:[^\\/:*?"<>|\r\n]+\\)*[^\\/:*?"<>|\r\n]+|/(?:[^/\s]+/)*[^/\s]+)"#).unwrap()
});

pub static REGISTRY_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bHK(?:EY_)?[A-Z_]*\\[^\s]+").unwrap());

pub static BITCOIN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:bc1|[13])[a-zA-HJ-NP-Z0-9]{25,39}\b").unwrap());

pub static ETHEREUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b0x[a-fA-F0-9]{40}\b").unwrap());

pub static CVE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bCVE-\d{4}-\d{4,}\b").unwrap());

pub static PORT_CONTEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bport[:\s=]+(\d{1,5})\b").unwrap());

pub const FP_IPV4: &[&str] = &["0.0.0.0", "255.255.255.255"];

pub const SUSPICIOUS_TLDS: &[&str] = &["local", "internal", "lan", "example", "test", "invalid"];

pub const MALICIOUS_KEYWORDS: &[&str] = &[
    "malicious", "malware", "trojan", "c2", "command and control", "attacker", "exploit",
    "phishing", "backdoor", "ransomware", "botnet",
];

pub const BENIGN_KEYWORDS: &[&str] = &["example", "sample", "documentation", "placeholder", "test data"];

pub const SUSPICIOUS_DIRS: &[&str] = &[
    "\\temp\\", "\\appdata\\", "/tmp/", "/var/tmp/", "\\windows\\system32\\", "/etc/",
];

pub const EXECUTABLE_EXTENSIONS: &[&str] = &[
    ".exe", ".dll", ".scr", ".bat", ".ps1", ".vbs", ".sh", ".cmd",
];

pub const AUTORUN_REGISTRY_PATHS: &[&str] = &[
    "\\currentversion\\run", "\\winlogon\\", "\\services\\",
];

pub fn is_private_ipv4(ip: &str) -> bool {
    let octets: Vec<u8> = ip.split('.').filter_map(|p| p.parse().ok()).collect();
    if octets.len() != 4 {
        return false;
    }
    match octets[0] {
        10 => true,
        172 => (16..=31).contains(&octets[1]),
        192 => octets[1] == 168,
        127 => true,
        _ => false,
    }
}
