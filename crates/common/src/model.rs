//! Core entities (spec §3) and their construction-time invariants.

use crate::error::CommonError;
pub use crate::scalar::ScalarValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity shared by `Analysis`, `Rule`, and `RuleMatch` (spec §8: a
/// match's severity always equals its source rule's severity).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Threat-score weight per spec §4.F.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Critical => 100.0,
            Severity::High => 75.0,
            Severity::Medium => 50.0,
            Severity::Low => 25.0,
            Severity::Info => 10.0,
        }
    }

    /// Derive severity from a 0..=100 threat score using the thresholds
    /// in spec §4.F ("Final score ... Severity thresholds").
    pub fn from_threat_score(score: f64) -> Self {
        if score >= 80.0 {
            Severity::Critical
        } else if score >= 60.0 {
            Severity::High
        } else if score >= 30.0 {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Lifecycle state of an [`Analysis`] (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl AnalysisStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisStatus::Completed | AnalysisStatus::Failed | AnalysisStatus::Cancelled
        )
    }
}

/// One processing run (spec §3 `Analysis`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    pub id: Uuid,
    pub source_file_name: String,
    pub source_file_size: u64,
    /// SHA-256 hex digest of the file content, lowercase, 64 chars.
    pub content_hash: String,
    pub parser_id: Option<String>,
    pub status: AnalysisStatus,
    pub progress: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub uploaded_at: DateTime<Utc>,
    pub parent_id: Option<Uuid>,
    pub threat_score: f64,
    pub severity: Severity,
    pub error_message: Option<String>,
}

impl Analysis {
    pub fn new(
        source_file_name: impl Into<String>,
        source_file_size: u64,
        content_hash: impl Into<String>,
    ) -> Result<Self, CommonError> {
        let content_hash = content_hash.into();
        validate_sha256_hex(&content_hash)?;
        let source_file_name = source_file_name.into();
        if source_file_name.trim().is_empty() {
            return Err(CommonError::EmptyField {
                field: "source_file_name",
            });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            source_file_name,
            source_file_size,
            content_hash,
            parser_id: None,
            status: AnalysisStatus::Queued,
            progress: 0,
            started_at: None,
            ended_at: None,
            uploaded_at: Utc::now(),
            parent_id: None,
            threat_score: 0.0,
            severity: Severity::Info,
            error_message: None,
        })
    }

    /// Apply a progress update, enforcing monotonicity (spec §3/§8).
    pub fn advance_progress(&mut self, progress: u8) -> Result<(), CommonError> {
        if self.status.is_terminal() {
            return Err(CommonError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("progress={progress}"),
            });
        }
        if progress < self.progress {
            return Err(CommonError::OutOfRange {
                field: "progress",
                value: progress.to_string(),
                min: self.progress.to_string(),
                max: "100".to_string(),
            });
        }
        self.progress = progress.min(100);
        Ok(())
    }

    /// Transition to a terminal status exactly once (spec §3 invariant).
    pub fn finish(&mut self, status: AnalysisStatus, error_message: Option<String>) -> Result<(), CommonError> {
        if self.status.is_terminal() {
            return Err(CommonError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", status),
            });
        }
        if !status.is_terminal() {
            return Err(CommonError::InvalidTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", status),
            });
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
        self.error_message = error_message;
        Ok(())
    }
}

fn validate_sha256_hex(hash: &str) -> Result<(), CommonError> {
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return Err(CommonError::InvalidFormat {
            field: "content_hash",
            value: hash.to_string(),
        });
    }
    Ok(())
}

/// Rule dialect (spec §3/§9: closed sum type replacing dynamic dispatch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleType {
    SignaturePattern,
    StructuredDetection,
    ObjectPattern,
    Custom,
}

/// A detection rule (spec §3 `Rule`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: Uuid,
    pub rule_type: RuleType,
    pub name: String,
    pub content: String,
    pub enabled: bool,
    pub built_in: bool,
    pub severity: Severity,
    pub priority: i32,
    pub category: String,
    pub author: String,
    pub tags: Vec<String>,
    pub mitre_attack_ids: Vec<String>,
    pub match_count: u64,
    pub last_matched: Option<DateTime<Utc>>,
}

impl Rule {
    pub fn new(
        rule_type: RuleType,
        name: impl Into<String>,
        content: impl Into<String>,
        severity: Severity,
    ) -> Result<Self, CommonError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CommonError::EmptyField { field: "name" });
        }
        let content = content.into();
        if content.trim().is_empty() {
            return Err(CommonError::EmptyField { field: "content" });
        }
        Ok(Self {
            id: Uuid::new_v4(),
            rule_type,
            name,
            content,
            enabled: true,
            built_in: false,
            severity,
            priority: 100,
            category: String::new(),
            author: String::new(),
            tags: Vec::new(),
            mitre_attack_ids: Vec::new(),
            match_count: 0,
            last_matched: None,
        })
    }
}

/// One line of a parsed log artifact (spec §3 `LogEvent`).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogEvent {
    pub line_number: usize,
    pub raw_text: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub level: String,
    pub source: String,
    pub message: String,
    pub fields: HashMap<String, ScalarValue>,
}

impl LogEvent {
    /// Resolve a field by name, falling back to the structured attributes
    /// before the free-form `fields` map (spec §4.D.3 "Field resolution
    /// order").
    pub fn resolve_field(&self, name: &str) -> Option<ScalarValue> {
        let lname = name.to_lowercase();
        match lname.as_str() {
            "level" => Some(ScalarValue::Str(self.level.clone())),
            "message" => Some(ScalarValue::Str(self.message.clone())),
            "source" => Some(ScalarValue::Str(self.source.clone())),
            "timestamp" => self.timestamp.map(|t| ScalarValue::Str(t.to_rfc3339())),
            "eventid" | "event_id" => self
                .fields
                .get("EventID")
                .or_else(|| self.fields.get("event_id"))
                .cloned(),
            _ => self.fields.get(name).cloned(),
        }
    }
}

/// A single matched location inside a [`RuleMatch`] (spec §3
/// `MatchDetail`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchDetail {
    pub matched_content: String,
    pub file_offset: Option<usize>,
    pub line_number: Option<usize>,
    pub context: String,
    pub fields: HashMap<String, ScalarValue>,
}

/// Result of evaluating one rule (spec §3 `RuleMatch`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatch {
    pub rule_id: Uuid,
    pub rule_type: RuleType,
    pub severity: Severity,
    pub match_count: usize,
    pub confidence: f64,
    pub details: Vec<MatchDetail>,
    pub mitre_attack_ids: Vec<String>,
    pub metadata: HashMap<String, String>,
}

/// Type tag for an [`Ioc`] (spec §3/§4.C).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IocType {
    Ipv4,
    Ipv6,
    Domain,
    Url,
    Email,
    Md5,
    Sha1,
    Sha256,
    Sha512,
    FilePath,
    RegistryKey,
    BitcoinAddress,
    EthereumAddress,
    Cve,
    Port,
}

/// An indicator of compromise (spec §3 `IOC`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ioc {
    pub value: String,
    pub ioc_type: IocType,
    pub confidence: u8,
    pub context: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub tags: Vec<String>,
}

impl Ioc {
    pub fn new(
        value: impl Into<String>,
        ioc_type: IocType,
        confidence: u8,
        context: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            value: value.into(),
            ioc_type,
            confidence: confidence.min(100),
            context: context.into(),
            first_seen: now,
            last_seen: now,
            tags: Vec::new(),
        }
    }

    /// Widen `[first_seen, last_seen]` to include `other` (spec §4.C
    /// "Merge duplicates by widening ... to include the new event's
    /// timestamp").
    pub fn widen(&mut self, at: DateTime<Utc>) {
        if at < self.first_seen {
            self.first_seen = at;
        }
        if at > self.last_seen {
            self.last_seen = at;
        }
    }
}

/// A MITRE ATT&CK technique correlation (spec §3 `Technique`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Technique {
    pub id: String,
    pub tactic: String,
    pub platform: String,
    pub description: String,
    pub confidence: u8,
}

impl Technique {
    pub fn new(
        id: impl Into<String>,
        tactic: impl Into<String>,
        platform: impl Into<String>,
        description: impl Into<String>,
        confidence: u8,
    ) -> Result<Self, CommonError> {
        let id = id.into().to_uppercase();
        validate_technique_id(&id)?;
        Ok(Self {
            id,
            tactic: tactic.into(),
            platform: platform.into(),
            description: description.into(),
            confidence: confidence.min(100),
        })
    }

    /// Collapse a duplicate technique id by raising confidence, capped at
    /// 100 (spec §3 invariant).
    pub fn merge(&mut self, other_confidence: u8) {
        self.confidence = self.confidence.saturating_add(other_confidence).min(100);
    }
}

fn validate_technique_id(id: &str) -> Result<(), CommonError> {
    let re = regex::Regex::new(r"^T\d{4}(\.\d{3})?$").expect("static pattern");
    if re.is_match(id) {
        Ok(())
    } else {
        Err(CommonError::InvalidFormat {
            field: "technique.id",
            value: id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_requires_valid_hash() {
        let err = Analysis::new("file.log", 10, "not-a-hash").unwrap_err();
        assert!(matches!(err, CommonError::InvalidFormat { .. }));
    }

    #[test]
    fn analysis_progress_is_monotonic() {
        let mut a = Analysis::new("file.log", 10, "a".repeat(64)).unwrap();
        a.advance_progress(10).unwrap();
        a.advance_progress(50).unwrap();
        assert!(a.advance_progress(20).is_err());
    }

    #[test]
    fn analysis_has_exactly_one_terminal_transition() {
        let mut a = Analysis::new("file.log", 10, "a".repeat(64)).unwrap();
        a.finish(AnalysisStatus::Completed, None).unwrap();
        assert!(a.finish(AnalysisStatus::Failed, None).is_err());
    }

    #[test]
    fn technique_id_must_match_pattern() {
        assert!(Technique::new("T1059", "execution", "windows", "", 50).is_ok());
        assert!(Technique::new("T1059.001", "execution", "windows", "", 50).is_ok());
        assert!(Technique::new("bogus", "execution", "windows", "", 50).is_err());
    }

    #[test]
    fn technique_merge_caps_at_100() {
        let mut t = Technique::new("T1059", "execution", "windows", "", 95).unwrap();
        t.merge(50);
        assert_eq!(t.confidence, 100);
    }

    #[test]
    fn severity_threshold_derivation() {
        assert_eq!(Severity::from_threat_score(80.0), Severity::Critical);
        assert_eq!(Severity::from_threat_score(60.0), Severity::High);
        assert_eq!(Severity::from_threat_score(30.0), Severity::Medium);
        assert_eq!(Severity::from_threat_score(29.9), Severity::Low);
    }
}
