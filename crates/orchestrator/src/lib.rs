//! Analysis Orchestrator (spec §4.F): drives one file through parsing,
//! rule evaluation, IOC extraction, and MITRE mapping, publishing
//! progress along the way and producing a scored, timestamped result.

pub mod adapters;
pub mod builtin_parser;
pub mod error;
pub mod options;
pub mod scoring;
pub mod timeline;
pub mod token;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use security_common::model::{Analysis, AnalysisStatus, Ioc, LogEvent, Rule, RuleMatch, Technique};
use security_common::ports::{AiSummarySink, PersistencePort, ProgressKind, ProgressMessage, ProgressSinkPort};
use security_mitre_mapper::{AttackChainMatch, GroupAttribution, MitreKnowledgeBase};
use security_plugin_host::PluginHost;
use security_rule_engine::CustomRuleProcessor;

pub use error::OrchestratorError;
pub use options::{AnalysisOptions, EngineConfig};
pub use timeline::TimelineEntry;
pub use token::CancellationToken;

/// A parser the orchestrator can dispatch to: either a sandboxed plugin
/// handle or the always-available built-in fallback (spec §4.F "Select
/// parser").
pub enum ParserChoice {
    Plugin { host: Arc<PluginHost>, handle: security_plugin_host::Handle },
    BuiltIn,
}

/// Full output of one completed (or partially completed, if cancelled
/// after some progress) analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisResult {
    pub analysis: Analysis,
    pub events: Vec<LogEvent>,
    pub matches: Vec<RuleMatch>,
    pub rule_failures: Vec<security_rule_engine::RuleFailure>,
    pub iocs: Vec<Ioc>,
    pub techniques: Vec<Technique>,
    pub chains: Vec<AttackChainMatch>,
    pub sophistication_score: u8,
    pub attributions: Vec<GroupAttribution>,
    pub timeline: Vec<TimelineEntry>,
}

fn progress_kind_for_publish(kind: ProgressKind, analysis_id: uuid::Uuid, payload: serde_json::Value) -> ProgressMessage {
    ProgressMessage { analysis_id, kind, payload }
}

/// Publishes one `Progress` message using the `{analysis_id, progress,
/// message}` schema (spec §6 "Emitted event schema").
async fn publish_progress(sink: &dyn ProgressSinkPort, analysis: &Analysis, message: &str) {
    sink.publish(progress_kind_for_publish(
        ProgressKind::Progress,
        analysis.id,
        serde_json::json!({ "analysis_id": analysis.id, "progress": analysis.progress, "message": message }),
    ))
    .await;
}

fn rule_type_from_name(name: &str) -> Option<security_common::model::RuleType> {
    use security_common::model::RuleType::*;
    match name {
        "signature_pattern" => Some(SignaturePattern),
        "structured_detection" => Some(StructuredDetection),
        "object_pattern" => Some(ObjectPattern),
        "custom" => Some(Custom),
        _ => None,
    }
}

/// Apply `include_rule_types`/`exclude_rule_categories` (spec §4.F
/// "Options") to the candidate rule set before dispatch.
fn select_rules(rules: &[Rule], options: &AnalysisOptions) -> Vec<Rule> {
    let include: Vec<_> = options.include_rule_types.iter().filter_map(|s| rule_type_from_name(s)).collect();
    rules
        .iter()
        .filter(|r| include.is_empty() || include.contains(&r.rule_type))
        .filter(|r| !options.exclude_rule_categories.iter().any(|c| c.eq_ignore_ascii_case(&r.category)))
        .cloned()
        .collect::<Vec<_>>()
}

/// Everything `run_pipeline` produces besides the (by-then `Completed`)
/// `Analysis` record itself, which the caller already owns by reference.
struct PipelineOutput {
    events: Vec<LogEvent>,
    matches: Vec<RuleMatch>,
    rule_failures: Vec<security_rule_engine::RuleFailure>,
    iocs: Vec<Ioc>,
    techniques: Vec<Technique>,
    chains: Vec<AttackChainMatch>,
    sophistication_score: u8,
    attributions: Vec<GroupAttribution>,
    timeline: Vec<TimelineEntry>,
}

/// Drives one analysis through every phase at its spec §4.F progress
/// anchor. Any `Err` leaves `analysis` in whatever state it reached;
/// `run_analysis` is responsible for the single terminal-status
/// transition on failure (spec §7/§8 "exactly one terminal transition").
#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
    analysis: &mut Analysis,
    raw_content: &str,
    rules: &[Rule],
    parser: ParserChoice,
    custom_processor: Option<&dyn CustomRuleProcessor>,
    kb: &MitreKnowledgeBase,
    persistence: &dyn PersistencePort,
    progress_sink: &dyn ProgressSinkPort,
    ai_sink: Option<&dyn AiSummarySink>,
    options: &AnalysisOptions,
    token: &CancellationToken,
) -> Result<PipelineOutput, OrchestratorError> {
    macro_rules! advance {
        ($progress:expr, $message:expr) => {{
            analysis.advance_progress($progress).map_err(|e| OrchestratorError::Dependency(e.to_string()))?;
            persistence.save_analysis(analysis).await.map_err(OrchestratorError::Dependency)?;
            publish_progress(progress_sink, analysis, $message).await;
        }};
    }
    macro_rules! check_cancel {
        () => {
            if token.is_cancelled() {
                return Err(OrchestratorError::Cancelled);
            }
        };
    }

    // --- Initialize (spec §4.F anchor 5) -----------------------------------
    advance!(5, "initializing analysis");
    check_cancel!();

    // --- Load file (spec §4.F anchor 10) -----------------------------------
    advance!(10, "loading file");
    check_cancel!();

    // --- Select parser (spec §4.F anchor 15) -------------------------------
    advance!(15, "selecting parser");

    let mut events = match &parser {
        ParserChoice::Plugin { host, handle } => {
            analysis.parser_id = Some(handle.0.to_string());
            host.execute(*handle, raw_content.as_bytes())
                .map(|r| r.events)
                .map_err(|e| OrchestratorError::ParseFailed(e.to_string()))?
        }
        ParserChoice::BuiltIn => builtin_parser::parse(raw_content),
    };
    if options.max_events > 0 && events.len() > options.max_events {
        events.truncate(options.max_events);
    }

    // --- Parse into events (spec §4.F anchor 30) ---------------------------
    advance!(30, "parsing events");
    check_cancel!();

    // --- Rule evaluation (spec §4.F anchor 50) ------------------------------
    let selected_rules = select_rules(rules, options);
    let rule_names: HashMap<uuid::Uuid, String> = selected_rules.iter().map(|r| (r.id, r.name.clone())).collect();
    let dispatch = security_rule_engine::process(&events, raw_content, &selected_rules, custom_processor, persistence).await;
    persistence
        .save_matches(analysis.id, &dispatch.matches)
        .await
        .map_err(OrchestratorError::Dependency)?;
    for m in &dispatch.matches {
        progress_sink
            .publish(progress_kind_for_publish(
                ProgressKind::RuleMatch,
                analysis.id,
                serde_json::json!({
                    "rule_id": m.rule_id,
                    "rule_name": rule_names.get(&m.rule_id).cloned().unwrap_or_default(),
                    "rule_type": format!("{:?}", m.rule_type),
                    "severity": format!("{:?}", m.severity),
                    "match_count": m.match_count,
                    "confidence": m.confidence,
                    "mitre_attack_ids": m.mitre_attack_ids,
                }),
            ))
            .await;
    }

    advance!(50, "dispatching rule engine");
    check_cancel!();

    // --- IOC extraction (spec §4.F anchor 60) ------------------------------
    let iocs = if options.extract_iocs {
        let config = security_ioc_extractor::ExtractorConfig::default();
        let extracted = security_ioc_extractor::extract(&events, raw_content, &config).await;
        persistence.save_iocs(analysis.id, &extracted).await.map_err(OrchestratorError::Dependency)?;
        for ioc in &extracted {
            progress_sink
                .publish(progress_kind_for_publish(
                    ProgressKind::IocFound,
                    analysis.id,
                    serde_json::json!({
                        "value": ioc.value,
                        "type": format!("{:?}", ioc.ioc_type),
                        "confidence": ioc.confidence,
                        "context": ioc.context,
                        "first_seen": ioc.first_seen,
                        "last_seen": ioc.last_seen,
                    }),
                ))
                .await;
        }
        extracted
    } else {
        Vec::new()
    };

    advance!(60, "extracting indicators of compromise");
    check_cancel!();

    // --- Timeline (spec §4.F anchor 70) ------------------------------------
    let timeline = timeline::build(&events, &dispatch.matches);
    advance!(70, "building timeline");
    check_cancel!();

    // --- MITRE mapping (spec §4.F anchor 80) -------------------------------
    let evidence_text: String = events.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join(" ");
    let file_extension = analysis.source_file_name.rsplit('.').next().unwrap_or("");
    let (techniques, chains, sophistication_score, attributions) = if options.map_to_mitre {
        let result = security_mitre_mapper::map(kb, &dispatch.matches, &iocs, &evidence_text, file_extension, analysis.severity);
        persistence
            .save_techniques(analysis.id, &result.techniques)
            .await
            .map_err(OrchestratorError::Dependency)?;
        (result.techniques, result.chains, result.sophistication_score, result.attributions)
    } else {
        (Vec::new(), Vec::new(), 0, Vec::new())
    };

    advance!(80, "mapping MITRE ATT&CK techniques");
    check_cancel!();

    // --- AI summarization (spec §4.F anchor 90) -----------------------------
    if options.enable_ai {
        if let Some(sink) = ai_sink {
            let summary_input = serde_json::json!({
                "analysis_id": analysis.id,
                "matches": dispatch.matches.len(),
                "iocs": iocs.len(),
                "techniques": techniques.len(),
            });
            let _ = sink.summarize(analysis.id, summary_input).await;
        }
    }

    advance!(90, "summarizing with AI");
    check_cancel!();

    // --- Scoring + Completed (spec §4.F anchor 100) -------------------------
    let score = scoring::threat_score(&dispatch.matches, &iocs);
    analysis.threat_score = score;
    analysis.severity = scoring::severity_for_score(score);
    analysis.advance_progress(100).map_err(|e| OrchestratorError::Dependency(e.to_string()))?;
    analysis
        .finish(AnalysisStatus::Completed, None)
        .map_err(|e| OrchestratorError::Dependency(e.to_string()))?;
    persistence.save_analysis(analysis).await.map_err(OrchestratorError::Dependency)?;

    progress_sink
        .publish(progress_kind_for_publish(
            ProgressKind::Completed,
            analysis.id,
            serde_json::json!({ "threat_score": analysis.threat_score, "severity": format!("{:?}", analysis.severity) }),
        ))
        .await;

    Ok(PipelineOutput {
        events,
        matches: dispatch.matches,
        rule_failures: dispatch.failures,
        iocs,
        techniques,
        chains,
        sophistication_score,
        attributions,
        timeline,
    })
}

/// Run one analysis end to end (spec §4.F `Algorithm`). `analysis` must
/// be freshly constructed (`status == Queued`); the caller is
/// responsible for persisting the initial record before calling this.
///
/// Every error path — cancellation, timeout, or a dependency failure —
/// finalizes `analysis` as `Failed` with an error message and publishes
/// one `Error` event before returning, so the analysis always ends with
/// exactly one terminal transition (spec §4.F/§7/§8).
#[allow(clippy::too_many_arguments)]
pub async fn run_analysis(
    mut analysis: Analysis,
    raw_content: &str,
    rules: &[Rule],
    parser: ParserChoice,
    custom_processor: Option<&dyn CustomRuleProcessor>,
    kb: &MitreKnowledgeBase,
    persistence: &dyn PersistencePort,
    progress_sink: &dyn ProgressSinkPort,
    ai_sink: Option<&dyn AiSummarySink>,
    options: &AnalysisOptions,
    caller_token: &CancellationToken,
) -> Result<AnalysisResult, OrchestratorError> {
    let token = CancellationToken::with_deadline(caller_token, std::time::Duration::from_secs(options.timeout_minutes * 60));

    analysis.status = AnalysisStatus::Running;
    analysis.started_at = Some(Utc::now());

    let pipeline_result = run_pipeline(
        &mut analysis,
        raw_content,
        rules,
        parser,
        custom_processor,
        kb,
        persistence,
        progress_sink,
        ai_sink,
        options,
        &token,
    )
    .await;

    match pipeline_result {
        Ok(output) => Ok(AnalysisResult {
            analysis,
            events: output.events,
            matches: output.matches,
            rule_failures: output.rule_failures,
            iocs: output.iocs,
            techniques: output.techniques,
            chains: output.chains,
            sophistication_score: output.sophistication_score,
            attributions: output.attributions,
            timeline: output.timeline,
        }),
        Err(err) => {
            let message = match &err {
                OrchestratorError::Cancelled => "cancelled or timed out".to_string(),
                other => other.to_string(),
            };
            let _ = analysis.finish(AnalysisStatus::Failed, Some(message.clone()));
            let _ = persistence.save_analysis(&analysis).await;
            progress_sink
                .publish(progress_kind_for_publish(
                    ProgressKind::Error,
                    analysis.id,
                    serde_json::json!({ "analysis_id": analysis.id, "message": message }),
                ))
                .await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapters::{ChannelProgressSink, InMemoryPersistence};
    use security_common::model::{RuleType, Severity};

    fn make_rule(rule_type: RuleType, content: &str, severity: Severity) -> Rule {
        Rule::new(rule_type, "r", content, severity).unwrap()
    }

    #[tokio::test]
    async fn end_to_end_pipeline_scores_a_matching_signature() {
        let analysis = Analysis::new("sample.log", 30, "a".repeat(64)).unwrap();
        let persistence = InMemoryPersistence::new();
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let sink = ChannelProgressSink::new(tx);
        let kb = MitreKnowledgeBase::new();
        let rules = vec![make_rule(
            RuleType::SignaturePattern,
            r#"rule Evil { strings: { $a = "malicious" } condition: any of them }"#,
            Severity::High,
        )];
        let raw = "2024-01-15 10:30:45 ERROR auth: malicious login attempt from 10.0.0.5";

        let result = run_analysis(
            analysis,
            raw,
            &rules,
            ParserChoice::BuiltIn,
            None,
            &kb,
            &persistence,
            &sink,
            None,
            &AnalysisOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.analysis.status, AnalysisStatus::Completed);
        assert_eq!(result.analysis.progress, 100);
        assert_eq!(result.matches.len(), 1);
        assert!(result.analysis.threat_score > 0.0);

        let mut saw_completed = false;
        while let Ok(msg) = rx.try_recv() {
            if msg.kind == ProgressKind::Completed {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn already_cancelled_token_aborts_before_completion() {
        let analysis = Analysis::new("sample.log", 10, "a".repeat(64)).unwrap();
        let persistence = InMemoryPersistence::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let sink = ChannelProgressSink::new(tx);
        let kb = MitreKnowledgeBase::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = run_analysis(
            analysis,
            "no events here",
            &[],
            ParserChoice::BuiltIn,
            None,
            &kb,
            &persistence,
            &sink,
            None,
            &AnalysisOptions::default(),
            &token,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, OrchestratorError::Cancelled));
    }

    #[tokio::test]
    async fn rule_type_filter_excludes_non_matching_dialects() {
        let analysis = Analysis::new("sample.log", 10, "a".repeat(64)).unwrap();
        let persistence = InMemoryPersistence::new();
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let sink = ChannelProgressSink::new(tx);
        let kb = MitreKnowledgeBase::new();
        let rules = vec![make_rule(
            RuleType::SignaturePattern,
            r#"rule Evil { strings: { $a = "malicious" } condition: any of them }"#,
            Severity::High,
        )];
        let options = AnalysisOptions {
            include_rule_types: vec!["object_pattern".to_string()],
            ..AnalysisOptions::default()
        };

        let result = run_analysis(
            analysis,
            "malicious content here",
            &rules,
            ParserChoice::BuiltIn,
            None,
            &kb,
            &persistence,
            &sink,
            None,
            &options,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(result.matches.is_empty());
    }

    /// Delegates to `InMemoryPersistence` for everything except
    /// `save_matches`, which always fails — simulates a dependency
    /// outage partway through the pipeline (spec §7 `DependencyError`).
    struct FlakyPersistence {
        inner: InMemoryPersistence,
    }

    #[async_trait::async_trait]
    impl security_common::ports::PersistencePort for FlakyPersistence {
        async fn save_analysis(&self, analysis: &Analysis) -> Result<(), String> {
            self.inner.save_analysis(analysis).await
        }
        async fn load_analysis(&self, id: uuid::Uuid) -> Result<Option<Analysis>, String> {
            self.inner.load_analysis(id).await
        }
        async fn list_analyses(&self) -> Result<Vec<Analysis>, String> {
            self.inner.list_analyses().await
        }
        async fn save_rule(&self, rule: &Rule) -> Result<(), String> {
            self.inner.save_rule(rule).await
        }
        async fn list_rules(&self) -> Result<Vec<Rule>, String> {
            self.inner.list_rules().await
        }
        async fn save_matches(&self, _analysis_id: uuid::Uuid, _matches: &[RuleMatch]) -> Result<(), String> {
            Err("persistence unavailable".to_string())
        }
        async fn save_iocs(&self, analysis_id: uuid::Uuid, iocs: &[security_common::model::Ioc]) -> Result<(), String> {
            self.inner.save_iocs(analysis_id, iocs).await
        }
        async fn save_techniques(
            &self,
            analysis_id: uuid::Uuid,
            techniques: &[security_common::model::Technique],
        ) -> Result<(), String> {
            self.inner.save_techniques(analysis_id, techniques).await
        }
        async fn update_rule_stats(
            &self,
            rule_id: uuid::Uuid,
            delta_matches: u64,
            last_matched: chrono::DateTime<Utc>,
        ) -> Result<(), String> {
            self.inner.update_rule_stats(rule_id, delta_matches, last_matched).await
        }
    }

    #[tokio::test]
    async fn dependency_failure_finalizes_failed_and_publishes_error() {
        let analysis = Analysis::new("sample.log", 10, "a".repeat(64)).unwrap();
        let persistence = FlakyPersistence { inner: InMemoryPersistence::new() };
        let (tx, mut rx) = tokio::sync::mpsc::channel(64);
        let sink = ChannelProgressSink::new(tx);
        let kb = MitreKnowledgeBase::new();
        let analysis_id = analysis.id;

        let err = run_analysis(
            analysis,
            "nothing interesting here",
            &[],
            ParserChoice::BuiltIn,
            None,
            &kb,
            &persistence,
            &sink,
            None,
            &AnalysisOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, OrchestratorError::Dependency(_)));

        let stored = persistence.inner.load_analysis(analysis_id).await.unwrap().unwrap();
        assert_eq!(stored.status, AnalysisStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("dependency unavailable: persistence unavailable"));

        let mut saw_error = false;
        while let Ok(msg) = rx.try_recv() {
            if msg.kind == ProgressKind::Error {
                saw_error = true;
                assert_eq!(msg.payload["message"], "dependency unavailable: persistence unavailable");
            }
        }
        assert!(saw_error);
    }
}
