//! Eight evidence mappers (spec §4.E): each inspects one slice of the
//! available evidence and proposes candidate technique ids with a seed
//! confidence. `map()` merges their output.

use regex::Regex;
use security_common::model::{Ioc, IocType};
use std::sync::OnceLock;

/// One technique proposal from a single mapper.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub technique_id: &'static str,
    pub confidence: u8,
}

fn keyword_hits(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// IOC-derived candidates: file hashes suggest tool transfer, network
/// indicators suggest C2 traffic, crypto addresses suggest ransomware
/// payment infrastructure.
pub fn from_iocs(iocs: &[Ioc]) -> Vec<Candidate> {
    let mut out = Vec::new();
    for ioc in iocs {
        match ioc.ioc_type {
            IocType::Md5 | IocType::Sha1 | IocType::Sha256 | IocType::Sha512 => {
                out.push(Candidate { technique_id: "T1105", confidence: 55 });
            }
            IocType::Ipv4 | IocType::Ipv6 | IocType::Domain | IocType::Url => {
                out.push(Candidate { technique_id: "T1071", confidence: 50 });
            }
            IocType::BitcoinAddress | IocType::EthereumAddress => {
                out.push(Candidate { technique_id: "T1486", confidence: 60 });
            }
            IocType::Cve => {
                out.push(Candidate { technique_id: "T1204", confidence: 45 });
            }
            IocType::RegistryKey => {
                out.push(Candidate { technique_id: "T1547", confidence: 55 });
            }
            IocType::FilePath => {
                out.push(Candidate { technique_id: "T1070", confidence: 40 });
            }
            IocType::Email => {
                out.push(Candidate { technique_id: "T1566", confidence: 50 });
            }
            IocType::Port => {}
        }
    }
    out
}

fn behavior_regexes() -> &'static [(Regex, &'static str, u8)] {
    static RES: OnceLock<Vec<(Regex, &'static str, u8)>> = OnceLock::new();
    RES.get_or_init(|| {
        vec![
            (Regex::new(r"(?i)powershell\s+-enc|invoke-expression|iex\(").unwrap(), "T1059", 65),
            (Regex::new(r"(?i)cmd\.exe\s*/c|/bin/sh\s+-c|bash\s+-c").unwrap(), "T1059", 60),
            (Regex::new(r"(?i)whoami|systeminfo|uname\s+-a|hostname").unwrap(), "T1082", 50),
        ]
    })
}

/// Behavior-pattern candidates: command-line shapes characteristic of
/// interpreter abuse or host reconnaissance.
pub fn from_behavior_regexes(evidence_text: &str) -> Vec<Candidate> {
    behavior_regexes()
        .iter()
        .filter(|(re, _, _)| re.is_match(evidence_text))
        .map(|(_, id, conf)| Candidate { technique_id: id, confidence: *conf })
        .collect()
}

/// Artifact-derived candidates from the parsed file's extension.
pub fn from_artifacts(file_extension: &str) -> Vec<Candidate> {
    match file_extension.trim_start_matches('.').to_lowercase().as_str() {
        "ps1" | "vbs" | "js" | "bat" | "sh" => vec![Candidate { technique_id: "T1059", confidence: 55 }],
        "scr" | "exe" | "dll" => vec![Candidate { technique_id: "T1204", confidence: 45 }],
        _ => vec![],
    }
}

/// File-operation candidates: deletion/overwrite keywords suggest
/// indicator removal or encryption-for-impact.
pub fn from_file_ops(evidence_text: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    if keyword_hits(evidence_text, &["deleted shadow", "vssadmin delete", "wbadmin delete", "bcdedit"]) {
        out.push(Candidate { technique_id: "T1490", confidence: 70 });
    }
    if keyword_hits(evidence_text, &["file deleted", "log cleared", "event log was cleared", "clearlogs"]) {
        out.push(Candidate { technique_id: "T1070", confidence: 55 });
    }
    if keyword_hits(evidence_text, &["encrypted", "ransom", ".locked", ".encrypted"]) {
        out.push(Candidate { technique_id: "T1486", confidence: 65 });
    }
    out
}

/// Network-activity candidates from raw IOC network indicators plus
/// textual beacon/exfiltration keywords.
pub fn from_network_activity(iocs: &[Ioc], evidence_text: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    if iocs.iter().any(|i| matches!(i.ioc_type, IocType::Ipv4 | IocType::Ipv6 | IocType::Domain)) {
        out.push(Candidate { technique_id: "T1018", confidence: 35 });
    }
    if keyword_hits(evidence_text, &["beacon", "c2 check-in", "exfiltrat", "data upload to"]) {
        out.push(Candidate { technique_id: "T1041", confidence: 60 });
    }
    out
}

/// Persistence candidates from autorun/registry/scheduled-task keywords.
pub fn from_persistence(evidence_text: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    if keyword_hits(evidence_text, &["run\\\\", "currentversion\\run", "startup folder", "registry run key"]) {
        out.push(Candidate { technique_id: "T1547", confidence: 60 });
    }
    if keyword_hits(evidence_text, &["schtasks", "scheduled task", "crontab"]) {
        out.push(Candidate { technique_id: "T1053", confidence: 60 });
    }
    out
}

/// Defense-evasion candidates: process injection and obfuscation idioms.
pub fn from_defense_evasion(evidence_text: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    if keyword_hits(evidence_text, &["createremotethread", "process hollowing", "reflective injection", "dll injection"]) {
        out.push(Candidate { technique_id: "T1055", confidence: 70 });
    }
    if keyword_hits(evidence_text, &["base64 -d", "frombase64string", "xor decode", "packed payload"]) {
        out.push(Candidate { technique_id: "T1027", confidence: 55 });
    }
    out
}

/// Command-and-control candidates from IOC network infrastructure plus
/// C2 keywords.
pub fn from_command_and_control(iocs: &[Ioc], evidence_text: &str) -> Vec<Candidate> {
    let mut out = Vec::new();
    if iocs.iter().any(|i| i.ioc_type == IocType::Url) {
        out.push(Candidate { technique_id: "T1071", confidence: 50 });
    }
    if keyword_hits(evidence_text, &["user-agent", "http post to", "command and control", "dropped payload"]) {
        out.push(Candidate { technique_id: "T1105", confidence: 55 });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn powershell_encoded_command_maps_to_execution() {
        let cands = from_behavior_regexes("ran powershell -enc SQBFAFgA");
        assert!(cands.iter().any(|c| c.technique_id == "T1059"));
    }

    #[test]
    fn ransomware_keyword_maps_to_data_encrypted() {
        let cands = from_file_ops("all files were encrypted, pay the ransom");
        assert!(cands.iter().any(|c| c.technique_id == "T1486"));
    }

    #[test]
    fn script_extension_maps_to_execution() {
        let cands = from_artifacts(".ps1");
        assert!(cands.iter().any(|c| c.technique_id == "T1059"));
    }
}
