use async_trait::async_trait;
use sqlgrade_core::config::{parse_problem, EngineConfig};
use sqlgrade_core::dataset::source::SourceFetcher;
use sqlgrade_core::dataset::{Dataset, DatasetLoader};
use sqlgrade_core::engine::{cancel, CancelSignal, Grader};
use sqlgrade_core::errors::ExecutionError;
use sqlgrade_core::model::{
    DisplayPolicy, ExecutionStatus, GradeRequest, Mode, Problem, SubmissionResult,
};
use sqlgrade_core::redaction::render_for_submitter;
use sqlgrade_core::sandbox::{QueryExecutor, RawResult, SandboxLimits};
use sqlgrade_core::storage::Store;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const SCORES: &str = r#"
id: scores
tables:
  - name: scores
    columns:
      - { name: player, type: TEXT }
      - { name: points, type: INTEGER }
    rows:
      - { player: ann, points: 30 }
      - { player: bob, points: 20 }
      - { player: cat, points: 10 }
settings: { timeout_ms: 300 }
tests:
  - id: ranked
    name: ranked by points
    expected:
      - { player: ann, points: 30 }
      - { player: bob, points: 20 }
      - { player: cat, points: 10 }
  - id: any-order
    compare: { order: unordered }
    expected:
      - { player: cat, points: 10 }
      - { player: ann, points: 30 }
      - { player: bob, points: 20 }
  - id: secret
    hidden: true
    expected:
      - { player: zed, points: 4242 }
"#;

const RANKED: &str = "SELECT player, points FROM scores ORDER BY points DESC";

fn grader(dir: &tempfile::TempDir) -> Grader {
    Grader::new(EngineConfig {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    })
}

fn problem(yaml: &str) -> Problem {
    parse_problem(yaml, true).unwrap()
}

fn submit(problem_id: &str, sql: &str) -> GradeRequest {
    GradeRequest {
        problem_id: problem_id.into(),
        submitter_id: "tester".into(),
        query_text: sql.into(),
        mode: Mode::Submit,
    }
}

fn assert_coverage(result: &SubmissionResult) {
    for tr in &result.test_results {
        let d = &tr.validation_details;
        assert_eq!(
            d.row_comparisons.len(),
            tr.user_output.len().max(tr.expected_output.len()),
            "case {}",
            tr.test_case_id
        );
        assert!(d.matching_row_count <= d.total_row_count);
    }
}

#[tokio::test]
async fn test_scenario_a_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(SCORES);
    let runaway = "WITH RECURSIVE r(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM r) \
                   SELECT count(*) AS player FROM r";
    let r = grader(&dir).grade(&p, &submit("scores", runaway)).await;

    assert!(r.success);
    assert!(!r.is_correct);
    assert_eq!(r.test_results.len(), 3);
    for tr in &r.test_results {
        assert_eq!(tr.execution_status, ExecutionStatus::Timeout);
        assert!(!tr.is_correct);
    }
    assert_coverage(&r);
}

#[tokio::test]
async fn test_scenario_b_wrong_order() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(SCORES);
    let r = grader(&dir)
        .grade(&p, &submit("scores", "SELECT player, points FROM scores ORDER BY points ASC"))
        .await;

    let ranked = &r.test_results[0];
    assert!(!ranked.output_matches);
    assert!(!ranked.validation_details.row_comparisons[0].matches);
    assert!(ranked.validation_details.row_comparisons[1].matches);
    assert!(ranked
        .feedback
        .iter()
        .any(|f| f.contains("ORDER BY")));

    // the same rows pass the multiset comparison
    assert!(r.test_results[1].output_matches);
    assert_coverage(&r);
}

#[tokio::test]
async fn test_scenario_c_missing_row() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(SCORES);
    let r = grader(&dir)
        .grade(
            &p,
            &submit("scores", "SELECT player, points FROM scores WHERE points > 10 ORDER BY points DESC"),
        )
        .await;

    let d = &r.test_results[0].validation_details;
    assert_eq!(d.total_row_count, 3);
    assert!(d.matching_row_count <= 2);
    assert_eq!(
        d.row_comparisons
            .iter()
            .filter(|c| c.actual_row.is_none())
            .count(),
        1
    );
    assert!(!d.comparison_differences.is_empty());
    assert_coverage(&r);
}

#[tokio::test]
async fn test_scenario_d_forbidden_statement() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(SCORES);
    let g = grader(&dir);
    let r = g.grade(&p, &submit("scores", "DROP TABLE scores")).await;

    assert!(r.success);
    for tr in &r.test_results {
        assert_eq!(tr.execution_status, ExecutionStatus::ForbiddenStatement);
        assert_eq!(tr.execution_time_ms, 0);
        assert_eq!(tr.memory_used_bytes, 0);
    }
    assert_eq!(r.execution_stats.max_time_ms, 0);
    assert_eq!(r.execution_stats.memory_used_mb, 0.0);

    // the shared dataset is untouched
    let again = g.grade(&p, &submit("scores", RANKED)).await;
    assert!(again.test_results[0].is_correct);
}

#[tokio::test]
async fn test_scenario_e_hidden_failure_is_not_leaked() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(SCORES);
    let r = grader(&dir).grade(&p, &submit("scores", RANKED)).await;

    assert!(r.success);
    assert!(!r.is_correct);
    assert!(r.test_results[0].is_correct && r.test_results[1].is_correct);
    assert!(!r.test_results[2].is_correct);
    assert!(r.feedback.iter().any(|f| f == "Hidden test case #1: failed"));
    assert!(r.feedback.iter().all(|f| !f.contains("4242") && !f.contains("zed")));

    let shown = render_for_submitter(&r, DisplayPolicy::AllPublic);
    let json = serde_json::to_string(&shown).unwrap();
    assert!(!json.contains("4242"));
    assert!(!json.contains("zed"));
    assert_eq!(shown.test_results[2].feedback, vec!["failed".to_string()]);
}

#[tokio::test]
async fn test_one_result_per_case_in_declaration_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut p = problem(SCORES);
    p.settings.case_concurrency = Some(3);
    let r = grader(&dir).grade(&p, &submit("scores", RANKED)).await;

    let ids: Vec<&str> = r.test_results.iter().map(|t| t.test_case_id.as_str()).collect();
    assert_eq!(ids, vec!["ranked", "any-order", "secret"]);
    assert!((r.score - 66.67).abs() < 1e-9, "{}", r.score);
}

#[tokio::test]
async fn test_coverage_across_outcomes() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(SCORES);
    let g = grader(&dir);
    for sql in [
        RANKED,
        "SELECT player FROM scores",
        "SELECT player, points FROM scores UNION ALL SELECT 'dan', 5",
        "SELECT * FROM scores WHERE 0",
        "SELECT nope FROM scores",
        "UPDATE scores SET points = 0",
    ] {
        let r = g.grade(&p, &submit("scores", sql)).await;
        assert!(r.success, "{}", sql);
        assert_eq!(r.test_results.len(), p.tests.len());
        assert_coverage(&r);
    }
}

#[tokio::test]
async fn test_idempotent_grading() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(SCORES);
    let g = grader(&dir);
    let sql = "SELECT player, points FROM scores ORDER BY player";
    let a = g.grade(&p, &submit("scores", sql)).await;
    let b = g.grade(&p, &submit("scores", sql)).await;
    assert_eq!(a.score, b.score);
    assert_eq!(a.is_correct, b.is_correct);
    assert_ne!(a.submission_id, b.submission_id);
}

#[tokio::test]
async fn test_empty_expected_and_empty_actual() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(
        r#"
id: empty
tables:
  - name: t
    columns: [{ name: x, type: INTEGER }]
    rows: [{ x: 1 }]
tests:
  - id: none
    expected: []
"#,
    );
    let r = grader(&dir)
        .grade(&p, &submit("empty", "SELECT x FROM t WHERE x > 5"))
        .await;
    let tr = &r.test_results[0];
    assert!(tr.output_matches);
    assert!(tr.is_correct);
    assert_eq!(tr.validation_details.total_row_count, 0);
    assert_eq!(tr.validation_details.matching_row_count, 0);
    assert!(tr.validation_details.row_comparisons.is_empty());
}

#[tokio::test]
async fn test_run_mode_executes_first_public_case() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(SCORES);
    let mut req = submit("scores", RANKED);
    req.mode = Mode::Run;
    let r = grader(&dir).grade(&p, &req).await;
    assert_eq!(r.test_results.len(), 1);
    assert_eq!(r.test_results[0].test_case_id, "ranked");
    assert!(r.is_correct);
}

#[tokio::test]
async fn test_missing_source_is_infrastructure_failure() {
    let dir = tempfile::tempdir().unwrap();
    let p = problem(
        r#"
id: broken
tables:
  - name: t
    columns: [{ name: x, type: INTEGER }]
    source: { kind: json, uri: /definitely/not/here.json }
tests:
  - id: c1
    expected: [{ x: 1 }]
"#,
    );
    let r = grader(&dir).grade(&p, &submit("broken", "SELECT x FROM t")).await;
    assert!(!r.success);
    assert!(!r.is_correct);
    assert!(r.test_results.is_empty());
    assert!(r.feedback[0].contains("dataset is unavailable"));
    // the path is an operator detail, not a submitter one
    assert!(!r.feedback[0].contains("/definitely"));
}

#[tokio::test]
async fn test_submit_mode_persists_run_mode_does_not() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::memory().unwrap();
    store.init_schema().unwrap();
    let p = problem(SCORES);
    let g = grader(&dir).with_store(store.clone());

    let submitted = g.grade(&p, &submit("scores", RANKED)).await;
    let mut run = submit("scores", RANKED);
    run.mode = Mode::Run;
    g.grade(&p, &run).await;

    let recent = store.fetch_recent("scores", 10).unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, submitted.submission_id);
    assert_eq!((recent[0].passed, recent[0].total), (2, 3));

    let back = store.get_submission(&submitted.submission_id).unwrap().unwrap();
    assert_eq!(back.score, submitted.score);
    assert_eq!(back.test_results.len(), 3);
}

/// Ignores its own limits and only stops when told to.
struct StallingExecutor;

#[async_trait]
impl QueryExecutor for StallingExecutor {
    async fn execute(
        &self,
        _dataset: Arc<Dataset>,
        _query: &str,
        _limits: SandboxLimits,
        cancel: CancelSignal,
    ) -> Result<RawResult, ExecutionError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(RawResult::default()),
        }
    }

    fn name(&self) -> &'static str {
        "stalling"
    }
}

/// Fails on the first call; later calls stall until cancelled.
#[derive(Default)]
struct BrokenExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl QueryExecutor for BrokenExecutor {
    async fn execute(
        &self,
        _dataset: Arc<Dataset>,
        _query: &str,
        _limits: SandboxLimits,
        cancel: CancelSignal,
    ) -> Result<RawResult, ExecutionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            return Err(ExecutionError::Infrastructure("could not open dataset".into()));
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(ExecutionError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(RawResult::default()),
        }
    }

    fn name(&self) -> &'static str {
        "broken"
    }
}

#[tokio::test]
async fn test_outer_budget_marks_remaining_cases_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let g = Grader::new(EngineConfig {
        cache_dir: dir.path().to_path_buf(),
        overhead_ms: 0,
        ..Default::default()
    })
    .with_executor(Arc::new(StallingExecutor));
    let mut p = problem(SCORES);
    p.settings.timeout_ms = Some(50);
    g.loader().load(&p).await.unwrap();

    let started = std::time::Instant::now();
    let r = g.grade(&p, &submit("scores", RANKED)).await;
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(r.success);
    assert_eq!(r.test_results.len(), 3);
    assert!(r
        .test_results
        .iter()
        .all(|t| t.execution_status == ExecutionStatus::Timeout));
    assert_coverage(&r);
}

#[tokio::test]
async fn test_external_cancel_resolves_failed_result() {
    let dir = tempfile::tempdir().unwrap();
    let g = grader(&dir).with_executor(Arc::new(StallingExecutor));
    let p = problem(SCORES);
    let (handle, signal) = cancel::pair();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });
    let r = g
        .grade_with_cancel(&p, &submit("scores", RANKED), signal)
        .await;
    canceller.await.unwrap();

    assert!(!r.success);
    assert!(r.test_results.is_empty());
    assert!(r.feedback[0].contains("cancelled"));
}

#[tokio::test]
async fn test_sandbox_failure_aborts_submission() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(BrokenExecutor::default());
    let g = grader(&dir).with_executor(executor.clone());
    let p = problem(SCORES);
    let r = g.grade(&p, &submit("scores", RANKED)).await;
    assert!(!r.success);
    assert!(r.test_results.is_empty());
    assert!(r.feedback[0].contains("internal error"));
    // remaining cases never reach the executor
    assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_sandbox_failure_interrupts_parallel_cases() {
    let dir = tempfile::tempdir().unwrap();
    let executor = Arc::new(BrokenExecutor::default());
    let g = grader(&dir).with_executor(executor.clone());
    let mut p = problem(SCORES);
    p.settings.case_concurrency = Some(3);
    p.settings.timeout_ms = Some(20_000);

    let started = std::time::Instant::now();
    let r = g.grade(&p, &submit("scores", RANKED)).await;
    // the stalled cases are cut short instead of running to their timeout
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!r.success);
    assert!(r.test_results.is_empty());
    assert!(r.feedback[0].contains("internal error"));
}

/// Never finishes a download.
struct HangingFetcher;

#[async_trait]
impl SourceFetcher for HangingFetcher {
    async fn fetch(&self, _uri: &str) -> anyhow::Result<Vec<u8>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(b"[]".to_vec())
    }

    fn name(&self) -> &'static str {
        "hanging"
    }
}

#[tokio::test]
async fn test_slow_source_is_bounded_by_submission_budget() {
    let dir = tempfile::tempdir().unwrap();
    let loader = DatasetLoader::with_fetcher(dir.path(), 4, Arc::new(HangingFetcher));
    let g = Grader::new(EngineConfig {
        cache_dir: dir.path().to_path_buf(),
        overhead_ms: 0,
        ..Default::default()
    })
    .with_loader(loader);
    let p = problem(
        r#"
id: remote
settings: { timeout_ms: 100 }
tables:
  - name: t
    columns: [{ name: x, type: INTEGER }]
    source: { kind: json, uri: "https://bucket.example.com/t.json" }
tests:
  - id: c1
    expected: []
"#,
    );

    let started = std::time::Instant::now();
    let r = g.grade(&p, &submit("remote", "SELECT x FROM t")).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!r.success);
    assert!(r.test_results.is_empty());
    assert!(r.feedback[0].contains("dataset is unavailable"), "{:?}", r.feedback);
}
