mod common;

use common::*;
use logsift::analyzer::{Analyzer, FALLBACK_NARRATIVE, NO_FINDINGS_NARRATIVE};
use logsift::config::types::{AnalysisMode, AnalyzerConfig, ReportFormat};
use logsift::report::{Category, Confidence, Severity};
use logsift::scheduler::TokioClock;
use logsift::sink::{FileSink, Sink};
use logsift::source::{MultiSource, Source};
use logsift::task::{EngineError, RunStatus, Task, TaskEngine};
use logsift::window::{WindowError, WindowSpec};
use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn clock() -> Arc<TokioClock> {
    Arc::new(TokioClock::new("2025-03-01T12:00:00+00:00".parse().unwrap()))
}

fn task(name: &str, source: impl Source + 'static, backend: Arc<ScriptedBackend>) -> Task {
    Task::new(name, Arc::new(source), Analyzer::new(backend, AnalyzerConfig::default()))
}

fn refused_records() -> Vec<logsift::source::LogRecord> {
    vec![
        record("A", 0, "Connection refused to 10.0.0.5:5432"),
        record("B", 30, "connection refused to 10.0.0.9:5432"),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_second_trigger_conflicts_while_first_runs() {
    let backend = Arc::new(ScriptedBackend::keyword());
    let source = StaticSource::new("api", refused_records()).with_delay(Duration::from_secs(10));
    let engine = TaskEngine::new([task("api", source, backend)], clock());

    let first = engine.trigger("api", None).unwrap();
    assert_eq!(first.status, RunStatus::Pending);

    assert!(matches!(engine.trigger("api", None), Err(EngineError::Conflict(name)) if name == "api"));
    assert!(matches!(engine.run("api", None).await, Err(EngineError::Conflict(_))));

    loop {
        tokio::time::sleep(Duration::from_secs(1)).await;
        if engine.run_status(first.id).unwrap().status.is_finished() {
            break;
        }
    }
    let finished = engine.run_status(first.id).unwrap();
    assert_eq!(finished.status, RunStatus::Succeeded);
    assert_eq!(engine.list_runs().len(), 1);

    // Free again once the first run is done.
    assert!(engine.trigger("api", None).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_one_failing_sink_is_a_warning() {
    let dir = TempDir::new().unwrap();
    let template = format!("{}/{{task}}_{{run_id}}.json", dir.path().display());
    let file_sink = Arc::new(FileSink::new(template, ReportFormat::Json));

    let backend = Arc::new(ScriptedBackend::keyword());
    let sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(FailingSink), file_sink.clone()];
    let task = task("api", StaticSource::new("api", refused_records()), backend).with_sinks(sinks);
    let engine = TaskEngine::new([task], clock());

    let run = engine.run("api", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.warnings.len(), 1);
    assert!(run.warnings[0].contains("broken"));
    assert!(run.warnings[0].contains("disk full"));

    let report = engine.report(run.id).unwrap();
    let persisted = std::fs::read(file_sink.path_for(&report)).unwrap();
    assert_eq!(persisted, report.to_json_bytes().unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_all_sinks_failing_fails_run_but_keeps_report() {
    let backend = Arc::new(ScriptedBackend::keyword());
    let sinks: Vec<Arc<dyn Sink>> = vec![Arc::new(FailingSink), Arc::new(FailingSink)];
    let task = task("api", StaticSource::new("api", refused_records()), backend).with_sinks(sinks);
    let engine = TaskEngine::new([task], clock());

    let run = engine.run("api", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("all 2 sinks failed"));
    assert_eq!(run.warnings.len(), 2);
    assert!(engine.report(run.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_no_sinks_is_success() {
    let backend = Arc::new(ScriptedBackend::keyword());
    let engine = TaskEngine::new(
        [task("api", StaticSource::new("api", refused_records()), backend)],
        clock(),
    );
    let run = engine.run("api", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.warnings.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_always_failing_chunk_yields_one_synthetic_finding() {
    let backend = Arc::new(ScriptedBackend::failing_analysis());
    let source = StaticSource::new("api", vec![record("api", 0, "ERROR boom")]);
    let engine = TaskEngine::new([task("api", source, backend.clone())], clock());

    let run = engine.run("api", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(backend.analysis_calls.load(Ordering::SeqCst), 3);

    let report = engine.report(run.id).unwrap();
    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert_eq!(finding.signature, "analysis-failed:api:0");
    assert_eq!(finding.category, Category::Error);
    assert_eq!(finding.severity, Severity::High);
}

#[tokio::test(start_paused = true)]
async fn test_equivalent_messages_merge_across_sources() {
    let backend = Arc::new(ScriptedBackend::keyword());
    let engine = TaskEngine::new(
        [task("api", StaticSource::new("mixed", refused_records()), backend.clone())],
        clock(),
    );

    let run = engine.run("api", None).await.unwrap();
    let report = engine.report(run.id).unwrap();

    assert_eq!(backend.analysis_calls.load(Ordering::SeqCst), 2);
    assert_eq!(report.findings.len(), 1);
    let finding = &report.findings[0];
    assert_eq!(finding.occurrences, 2);
    assert_eq!(
        finding.source_labels,
        BTreeSet::from(["A".to_string(), "B".to_string()])
    );
    assert_eq!(finding.first_seen, at(0));
    assert_eq!(finding.last_seen, at(30));
    assert_eq!(finding.description, "Connection refused to 10.0.0.5:5432");
    assert_eq!(finding.confidence, Confidence::High);
}

#[tokio::test(start_paused = true)]
async fn test_chain_without_adjacent_findings_has_no_links() {
    let chain = vec![edge("A", "B"), edge("B", "C")];
    let backend = Arc::new(ScriptedBackend::proposing(&chain));
    let source = StaticSource::new(
        "checkout",
        vec![
            record("A", 0, "ERROR upstream timeout"),
            record("B", 10, "request served in 12ms"),
            record("C", 20, "ERROR disk quota exceeded"),
        ],
    )
    .with_call_chain(chain);
    let engine = TaskEngine::new([task("checkout", source, backend)], clock());

    let run = engine.run("checkout", None).await.unwrap();
    let report = engine.report(run.id).unwrap();

    assert_eq!(report.findings.len(), 2);
    assert!(report.causal_links.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_findings_on_an_edge_are_linked() {
    let chain = vec![edge("A", "B"), edge("B", "C")];
    let backend = Arc::new(ScriptedBackend::proposing(&chain));
    let source = StaticSource::new(
        "checkout",
        vec![
            record("A", 0, "ERROR upstream returned 502"),
            record("B", 60, "ERROR connection pool exhausted"),
        ],
    )
    .with_call_chain(chain);
    let engine = TaskEngine::new([task("checkout", source, backend)], clock());

    let run = engine.run("checkout", None).await.unwrap();
    let report = engine.report(run.id).unwrap();

    assert_eq!(report.causal_links.len(), 1);
    let link = &report.causal_links[0];
    assert_eq!((link.from_label.as_str(), link.to_label.as_str()), ("A", "B"));
    assert_eq!(link.hypothesis, "B broke A");
    assert_eq!(link.evidence.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_modes_agree() {
    let records = vec![
        record("A", 0, "ERROR timeout calling payments"),
        record("A", 5, "WARN retrying request"),
        record("B", 7, "ERROR payment declined for order 991"),
        record("C", 9, "Connection refused to 10.0.0.5:5432"),
        record("A", 11, "ERROR timeout calling payments"),
    ];

    let mut reports = Vec::new();
    for mode in [AnalysisMode::Sequential, AnalysisMode::Concurrent] {
        let config = AnalyzerConfig {
            mode,
            concurrency: 2,
            max_chunk_records: 1,
            ..AnalyzerConfig::default()
        };
        let backend = Arc::new(ScriptedBackend::keyword());
        let task = Task::new(
            "api",
            Arc::new(StaticSource::new("api", records.clone())),
            Analyzer::new(backend, config),
        );
        let engine = TaskEngine::new([task], clock());
        let run = engine.run("api", None).await.unwrap();
        reports.push(engine.report(run.id).unwrap());
    }

    assert_eq!(reports[0].findings, reports[1].findings);
    assert_eq!(reports[0].narrative, reports[1].narrative);
    assert_eq!(reports[0].findings.len(), 4);
    let timeout = reports[0]
        .findings
        .iter()
        .find(|f| f.description.contains("timeout"))
        .unwrap();
    assert_eq!(timeout.occurrences, 2);
}

#[tokio::test(start_paused = true)]
async fn test_summary_failure_uses_fallback_narrative() {
    let backend = Arc::new(ScriptedBackend::failing_summary());
    let engine = TaskEngine::new(
        [task("api", StaticSource::new("api", refused_records()), backend.clone())],
        clock(),
    );

    let run = engine.run("api", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.warnings.len(), 1);
    assert!(run.warnings[0].starts_with("summarization failed"));
    assert_eq!(backend.summary_calls.load(Ordering::SeqCst), 3);

    let report = engine.report(run.id).unwrap();
    assert_eq!(report.narrative, FALLBACK_NARRATIVE);
    assert!(report.causal_links.is_empty());
    assert_eq!(report.findings.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_quiet_logs_skip_summary() {
    let backend = Arc::new(ScriptedBackend::keyword());
    let source = StaticSource::new("api", vec![record("api", 0, "GET /health 200")]);
    let engine = TaskEngine::new([task("api", source, backend.clone())], clock());

    let run = engine.run("api", None).await.unwrap();
    let report = engine.report(run.id).unwrap();
    assert_eq!(report.narrative, NO_FINDINGS_NARRATIVE);
    assert_eq!(backend.summary_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_collection_error_fails_run() {
    let backend = Arc::new(ScriptedBackend::keyword());
    let engine = TaskEngine::new([task("api", FailingSource("api"), backend.clone())], clock());

    let run = engine.run("api", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("container not found"));
    assert!(engine.report(run.id).is_none());
    assert_eq!(backend.analysis_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_partial_collection_failure_is_reported() {
    let children: Vec<Arc<dyn Source>> = vec![
        Arc::new(StaticSource::new("web", vec![record("web", 0, "ERROR upstream 502")])),
        Arc::new(FailingSource("db")),
    ];
    let source = MultiSource::new("stack".to_string(), children, Vec::new(), Duration::from_secs(5));
    let backend = Arc::new(ScriptedBackend::keyword());
    let engine = TaskEngine::new([task("stack", source, backend)], clock());

    let run = engine.run("stack", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.warnings.len(), 1);
    assert!(run.warnings[0].contains("db"));

    let report = engine.report(run.id).unwrap();
    assert_eq!(report.source_failures.len(), 1);
    assert_eq!(report.source_failures[0].source_label, "db");
    assert_eq!(report.findings.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_lookback_is_rejected_before_queueing() {
    let backend = Arc::new(ScriptedBackend::keyword());
    let engine = TaskEngine::new(
        [task("api", StaticSource::new("api", refused_records()), backend)],
        clock(),
    );

    let result = engine.trigger("api", Some(WindowSpec::hours(4_000_000_000)));
    assert!(matches!(
        result,
        Err(EngineError::InvalidWindow(WindowError::LookbackOutOfRange(_)))
    ));
    assert!(engine.list_runs().is_empty());

    let run = engine.run("api", Some(WindowSpec::hours(6))).await.unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_stops_concurrent_chunk_calls() {
    let backend = Arc::new(ScriptedBackend::keyword().with_latency(Duration::from_secs(30)));
    let records = (0..20)
        .map(|i| record("api", i, &format!("ERROR boom {}", i)))
        .collect();
    let config = AnalyzerConfig {
        mode: AnalysisMode::Concurrent,
        concurrency: 2,
        max_chunk_records: 1,
        ..AnalyzerConfig::default()
    };
    let task = Task::new(
        "api",
        Arc::new(StaticSource::new("api", records)),
        Analyzer::new(backend.clone(), config),
    )
    .with_deadline(Duration::from_secs(45));
    let engine = TaskEngine::new([task], clock());

    let run = engine.run("api", None).await.unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.unwrap().contains("deadline"));

    let at_deadline = backend.analysis_calls.load(Ordering::SeqCst);
    assert_eq!(at_deadline, 4);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(backend.analysis_calls.load(Ordering::SeqCst), at_deadline);
    assert_eq!(backend.summary_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_signature_seen_in_two_sources_keeps_per_source_times() {
    let chain = vec![edge("A", "B"), edge("B", "C")];
    let backend = Arc::new(ScriptedBackend::proposing(&chain));
    let source = StaticSource::new(
        "checkout",
        vec![
            record("A", 0, "ERROR upstream timeout 1"),
            record("C", 3600, "ERROR upstream timeout 2"),
            record("B", 3600, "ERROR disk full"),
        ],
    )
    .with_call_chain(chain);
    let engine = TaskEngine::new([task("checkout", source, backend)], clock());

    let run = engine.run("checkout", None).await.unwrap();
    let report = engine.report(run.id).unwrap();

    let timeout = report
        .findings
        .iter()
        .find(|f| f.description.contains("upstream timeout"))
        .unwrap();
    assert_eq!(
        timeout.source_labels,
        BTreeSet::from(["A".to_string(), "C".to_string()])
    );
    assert_eq!((timeout.first_seen, timeout.last_seen), (at(0), at(3600)));

    // A's timeout was an hour before B's failure; only B -> C overlaps.
    assert_eq!(report.causal_links.len(), 1);
    let link = &report.causal_links[0];
    assert_eq!((link.from_label.as_str(), link.to_label.as_str()), ("B", "C"));
}
