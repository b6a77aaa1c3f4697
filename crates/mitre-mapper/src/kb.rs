//! Static MITRE ATT&CK knowledge base (spec §4.E), seeded at startup from
//! an embedded literal table rather than a runtime file load, mirroring
//! the teacher's preference for baking reference data (`cvss.rs`'s match
//! arms) straight into the binary.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::MitreError;

/// One technique record in the knowledge base.
#[derive(Debug, Clone)]
pub struct TechniqueRecord {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub tactic: &'static str,
    pub platform: &'static str,
    pub data_sources: &'static [&'static str],
    /// Feeds the sophistication score's "+10 per advanced technique" term
    /// (spec §4.E).
    pub advanced: bool,
}

/// A known threat group and the subset of the knowledge base's
/// techniques it's associated with (spec §4.E "threat-group records").
#[derive(Debug, Clone)]
pub struct ThreatGroupRecord {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub techniques: &'static [&'static str],
}

const TECHNIQUES: &[TechniqueRecord] = &[
    TechniqueRecord { id: "T1566", name: "Phishing", description: "Adversary sends phishing messages to gain initial access.", tactic: "initial-access", platform: "Windows, macOS, Linux", data_sources: &["Email Gateway", "File Monitoring"], advanced: false },
    TechniqueRecord { id: "T1204", name: "User Execution", description: "A user executes malicious content delivered to them.", tactic: "execution", platform: "Windows, macOS, Linux", data_sources: &["Process Monitoring"], advanced: false },
    TechniqueRecord { id: "T1059", name: "Command and Scripting Interpreter", description: "Abuse of command and script interpreters to execute commands.", tactic: "execution", platform: "Windows, macOS, Linux", data_sources: &["Process Command-Line Parameters"], advanced: false },
    TechniqueRecord { id: "T1078", name: "Valid Accounts", description: "Use of legitimate credentials to maintain access.", tactic: "defense-evasion", platform: "Windows, macOS, Linux, Cloud", data_sources: &["Authentication Logs"], advanced: false },
    TechniqueRecord { id: "T1547", name: "Boot or Logon Autostart Execution", description: "Persistence via programs executed at boot or logon.", tactic: "persistence", platform: "Windows, macOS, Linux", data_sources: &["Windows Registry", "File Monitoring"], advanced: false },
    TechniqueRecord { id: "T1053", name: "Scheduled Task/Job", description: "Abuse of task scheduling for execution or persistence.", tactic: "persistence", platform: "Windows, macOS, Linux", data_sources: &["File Monitoring", "Process Monitoring"], advanced: false },
    TechniqueRecord { id: "T1055", name: "Process Injection", description: "Injecting code into the address space of another process.", tactic: "defense-evasion", platform: "Windows, Linux", data_sources: &["API Monitoring", "Process Monitoring"], advanced: true },
    TechniqueRecord { id: "T1027", name: "Obfuscated Files or Information", description: "Obfuscating content to make it harder to detect or analyze.", tactic: "defense-evasion", platform: "Windows, macOS, Linux", data_sources: &["File Monitoring", "Binary Analysis"], advanced: true },
    TechniqueRecord { id: "T1070", name: "Indicator Removal", description: "Deleting or altering artifacts to impede detection.", tactic: "defense-evasion", platform: "Windows, macOS, Linux", data_sources: &["File Monitoring", "Windows Event Logs"], advanced: true },
    TechniqueRecord { id: "T1003", name: "OS Credential Dumping", description: "Dumping credentials from the OS to obtain account access.", tactic: "credential-access", platform: "Windows, Linux", data_sources: &["Process Monitoring", "API Monitoring"], advanced: true },
    TechniqueRecord { id: "T1082", name: "System Information Discovery", description: "Gathering details about the operating system and hardware.", tactic: "discovery", platform: "Windows, macOS, Linux", data_sources: &["Process Command-Line Parameters"], advanced: false },
    TechniqueRecord { id: "T1018", name: "Remote System Discovery", description: "Enumerating other systems on a network.", tactic: "discovery", platform: "Windows, macOS, Linux", data_sources: &["Network Traffic", "Process Monitoring"], advanced: false },
    TechniqueRecord { id: "T1021", name: "Remote Services", description: "Using valid accounts to log into remote services.", tactic: "lateral-movement", platform: "Windows, macOS, Linux", data_sources: &["Authentication Logs", "Network Traffic"], advanced: false },
    TechniqueRecord { id: "T1071", name: "Application Layer Protocol", description: "Command and control blending in with existing traffic.", tactic: "command-and-control", platform: "Windows, macOS, Linux", data_sources: &["Network Traffic"], advanced: false },
    TechniqueRecord { id: "T1105", name: "Ingress Tool Transfer", description: "Transferring tools or files from an external system.", tactic: "command-and-control", platform: "Windows, macOS, Linux", data_sources: &["Network Traffic", "File Monitoring"], advanced: false },
    TechniqueRecord { id: "T1041", name: "Exfiltration Over C2 Channel", description: "Stealing data over an existing command and control channel.", tactic: "exfiltration", platform: "Windows, macOS, Linux", data_sources: &["Network Traffic"], advanced: true },
    TechniqueRecord { id: "T1486", name: "Data Encrypted for Impact", description: "Encrypting data to disrupt availability, e.g. ransomware.", tactic: "impact", platform: "Windows, macOS, Linux", data_sources: &["File Monitoring", "Process Monitoring"], advanced: true },
    TechniqueRecord { id: "T1490", name: "Inhibit System Recovery", description: "Deleting or disabling recovery features to prevent restoration.", tactic: "impact", platform: "Windows, Linux", data_sources: &["Process Command-Line Parameters"], advanced: true },
];

const THREAT_GROUPS: &[ThreatGroupRecord] = &[
    ThreatGroupRecord {
        name: "APT28",
        aliases: &["Fancy Bear", "Sofacy"],
        techniques: &["T1566", "T1059", "T1078", "T1071", "T1105"],
    },
    ThreatGroupRecord {
        name: "Lazarus Group",
        aliases: &["Hidden Cobra", "Guardians of Peace"],
        techniques: &["T1204", "T1055", "T1027", "T1003", "T1486", "T1490"],
    },
    ThreatGroupRecord {
        name: "FIN7",
        aliases: &["Carbon Spider"],
        techniques: &["T1566", "T1204", "T1059", "T1053", "T1021", "T1041"],
    },
];

/// Process-wide singleton (spec §5 "Shared resources"). Reads are
/// lock-free copies out of the embedded table; `refresh` is serialized by
/// the `RwLock` write side.
pub struct MitreKnowledgeBase {
    techniques: RwLock<HashMap<&'static str, TechniqueRecord>>,
    groups: RwLock<Vec<ThreatGroupRecord>>,
}

impl MitreKnowledgeBase {
    pub fn new() -> Self {
        let kb = Self {
            techniques: RwLock::new(HashMap::new()),
            groups: RwLock::new(Vec::new()),
        };
        kb.refresh().expect("embedded knowledge base literal is always well-formed");
        kb
    }

    /// Re-seed from the embedded table. Idempotent (spec §4.E "refresh is
    /// idempotent") since the source table never changes at runtime.
    pub fn refresh(&self) -> Result<(), MitreError> {
        let mut techniques = self.techniques.write().unwrap();
        techniques.clear();
        for t in TECHNIQUES {
            techniques.insert(t.id, t.clone());
        }
        let mut groups = self.groups.write().unwrap();
        groups.clear();
        groups.extend(THREAT_GROUPS.iter().cloned());
        Ok(())
    }

    pub fn technique(&self, id: &str) -> Option<TechniqueRecord> {
        self.techniques.read().unwrap().get(id).cloned()
    }

    pub fn all_technique_ids(&self) -> Vec<&'static str> {
        self.techniques.read().unwrap().keys().copied().collect()
    }

    pub fn groups(&self) -> Vec<ThreatGroupRecord> {
        self.groups.read().unwrap().clone()
    }
}

impl Default for MitreKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ships_with_eighteen_techniques_and_three_groups() {
        let kb = MitreKnowledgeBase::new();
        assert_eq!(kb.all_technique_ids().len(), 18);
        assert_eq!(kb.groups().len(), 3);
    }

    #[test]
    fn refresh_is_idempotent() {
        let kb = MitreKnowledgeBase::new();
        let before = kb.all_technique_ids().len();
        kb.refresh().unwrap();
        kb.refresh().unwrap();
        assert_eq!(kb.all_technique_ids().len(), before);
    }
}
