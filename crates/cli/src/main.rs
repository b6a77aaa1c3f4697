//! Runs one analysis against a local file using the reference adapters
//! and prints progress/result to stdout (spec.md §1 "runnable thing",
//! scoped down from the teacher's `axum` HTTP API).

use std::path::PathBuf;

use security_common::model::{Analysis, Rule, RuleType, Severity};
use security_mitre_mapper::MitreKnowledgeBase;
use security_orchestrator::adapters::{ChannelProgressSink, InMemoryPersistence};
use security_orchestrator::{run_analysis, AnalysisOptions, CancellationToken, ParserChoice};
use sha2::{Digest, Sha256};

fn default_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            RuleType::SignaturePattern,
            "Suspicious credential activity",
            r#"rule SuspiciousAuth { strings: { $a = "failed login" $b = "authentication failure" } condition: any of them }"#,
            Severity::Medium,
        )
        .expect("static built-in rule is well-formed"),
        Rule::new(
            RuleType::SignaturePattern,
            "Known-malicious keyword",
            r#"rule MaliciousKeyword { strings: { $a = "malicious" $b = "ransomware" $c = "backdoor" } condition: any of them }"#,
            Severity::High,
        )
        .expect("static built-in rule is well-formed"),
    ]
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let path = match std::env::args().nth(1) {
        Some(p) => PathBuf::from(p),
        None => {
            eprintln!("usage: security-cli <path-to-log-file>");
            std::process::exit(2);
        }
    };

    println!("Starting Security Log Analyzer...");
    let raw_content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to read {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    let content_hash = format!("{:x}", Sha256::digest(raw_content.as_bytes()));
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("unknown").to_string();
    let analysis = match Analysis::new(file_name, raw_content.len() as u64, content_hash) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("could not construct analysis record: {e}");
            std::process::exit(1);
        }
    };

    let persistence = InMemoryPersistence::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(256);
    let sink = ChannelProgressSink::new(tx);
    let kb = MitreKnowledgeBase::new();
    let rules = default_rules();
    let options = AnalysisOptions::default();

    let printer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            println!("[progress] {:?} {}", message.kind, message.payload);
        }
    });

    println!("Analyzing {} ({} bytes)...", path.display(), raw_content.len());
    match run_analysis(
        analysis,
        &raw_content,
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
    {
        Ok(result) => {
            drop(sink);
            let _ = printer.await;
            println!();
            println!("Analysis complete: {:?}", result.analysis.status);
            println!("  Threat score: {:.1} ({:?})", result.analysis.threat_score, result.analysis.severity);
            println!("  Events parsed: {}", result.events.len());
            println!("  Rule matches: {} ({} failures)", result.matches.len(), result.rule_failures.len());
            println!("  IOCs found: {}", result.iocs.len());
            println!("  MITRE techniques: {}", result.techniques.len());
            println!("  Attack chains: {}", result.chains.len());
            println!("  Sophistication score: {}", result.sophistication_score);
            for attribution in &result.attributions {
                println!("    possible attribution: {} ({:.1})", attribution.name, attribution.score);
            }
        }
        Err(e) => {
            drop(sink);
            let _ = printer.await;
            eprintln!("analysis failed: {e}");
            std::process::exit(1);
        }
    }
}
