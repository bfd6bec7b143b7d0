use super::cancel::{self, CancelSignal};
use super::state::{CasePhase, StateMachine, SubmissionState};
use crate::compare::compare;
use crate::config::EngineConfig;
use crate::dataset::{Dataset, DatasetLoader};
use crate::errors::{DatasetError, ExecutionError, StateError};
use crate::fingerprint;
use crate::model::{
    ExecutionStatus, GradeRequest, Mode, Problem, Submission, SubmissionResult, TestCase,
    TestResult,
};
use crate::normalize::normalize;
use crate::sandbox::{QueryExecutor, SandboxLimits, SqliteSandbox};
use crate::score::Scorer;
use crate::stats;
use crate::storage::store::Store;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Submission orchestrator. Cheap to clone; clones share the dataset cache,
/// the executor and the store.
#[derive(Clone)]
pub struct Grader {
    config: Arc<EngineConfig>,
    loader: DatasetLoader,
    executor: Arc<dyn QueryExecutor>,
    store: Option<Store>,
}

enum CaseOutcome {
    Graded(TestResult),
    /// Stopped by the submission deadline or by cancellation.
    Interrupted,
    Infrastructure(String),
}

/// Why a submission resolved into `success = false`.
#[derive(Debug)]
enum Abort {
    Dataset(DatasetError),
    Infrastructure(String),
    Cancelled,
    State(StateError),
}

impl Abort {
    fn user_message(&self) -> String {
        match self {
            Abort::Dataset(_) => {
                "Grading could not complete: the problem dataset is unavailable. Please retry."
                    .into()
            }
            Abort::Infrastructure(_) | Abort::State(_) => {
                "Grading could not complete due to an internal error. Please retry.".into()
            }
            Abort::Cancelled => "Grading was cancelled before it completed.".into(),
        }
    }
}

impl From<StateError> for Abort {
    fn from(e: StateError) -> Self {
        Abort::State(e)
    }
}

impl Grader {
    pub fn new(config: EngineConfig) -> Self {
        let loader = DatasetLoader::new(config.cache_dir.clone(), config.dataset_cache_entries);
        Self {
            config: Arc::new(config),
            loader,
            executor: Arc::new(SqliteSandbox),
            store: None,
        }
    }

    pub fn with_loader(mut self, loader: DatasetLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn loader(&self) -> &DatasetLoader {
        &self.loader
    }

    pub async fn grade(&self, problem: &Problem, request: &GradeRequest) -> SubmissionResult {
        self.grade_with_cancel(problem, request, CancelSignal::never())
            .await
    }

    /// Grades one submission. Always yields exactly one result: per-case
    /// failures become failing test results, anything else resolves into
    /// `success = false`.
    pub async fn grade_with_cancel(
        &self,
        problem: &Problem,
        request: &GradeRequest,
        cancel: CancelSignal,
    ) -> SubmissionResult {
        let submitted_at = chrono::Utc::now();
        let submission = Submission {
            id: fingerprint::submission_id(
                &request.problem_id,
                &request.submitter_id,
                &request.query_text,
                &submitted_at,
            ),
            problem_id: request.problem_id.clone(),
            submitter_id: request.submitter_id.clone(),
            query_text: request.query_text.clone(),
            submitted_at,
        };
        let started = Instant::now();
        tracing::info!(
            event = "submission_start",
            submission_id = %submission.id,
            problem_id = %submission.problem_id,
            submitter_id = %submission.submitter_id,
            mode = ?request.mode,
            query_len = submission.query_text.len()
        );

        let mut machine = StateMachine::new(&submission.id);
        let result = match self
            .evaluate(problem, request, &submission.id, &mut machine, &cancel)
            .await
        {
            Ok(r) => r,
            Err(abort) => {
                if !machine.state().is_terminal() {
                    let _ = machine.transition(SubmissionState::Failed);
                }
                tracing::warn!(
                    event = "submission_failed",
                    submission_id = %submission.id,
                    reason = ?abort
                );
                SubmissionResult::failed(&submission.id, abort.user_message())
            }
        };

        if request.mode == Mode::Submit {
            self.persist(&submission, &result);
        }

        tracing::info!(
            event = "submission_done",
            submission_id = %submission.id,
            success = result.success,
            is_correct = result.is_correct,
            score = result.score,
            cases = result.test_results.len(),
            duration_ms = started.elapsed().as_millis() as u64
        );
        result
    }

    async fn evaluate(
        &self,
        problem: &Problem,
        request: &GradeRequest,
        submission_id: &str,
        machine: &mut StateMachine,
        cancel: &CancelSignal,
    ) -> Result<SubmissionResult, Abort> {
        machine.transition(SubmissionState::Running)?;
        if cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }

        if request.problem_id != problem.id {
            return Err(Abort::Infrastructure(format!(
                "request targets problem '{}' but '{}' was supplied",
                request.problem_id, problem.id
            )));
        }

        let cases = select_cases(problem, request.mode);
        let limits: Vec<SandboxLimits> = cases
            .iter()
            .map(|tc| case_limits(&self.config, problem, tc))
            .collect();
        let budget = limits.iter().map(|l| l.timeout).sum::<Duration>()
            + Duration::from_millis(self.config.overhead_ms);
        let deadline = Instant::now() + budget;

        // dataset resolution counts against the submission budget
        let dataset = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Abort::Cancelled),
            _ = tokio::time::sleep_until(deadline.into()) => {
                return Err(Abort::Dataset(DatasetError::unavailable(
                    &problem.id,
                    format!("dataset not ready within {}ms", budget.as_millis()),
                )));
            }
            loaded = self.loader.load(problem) => loaded.map_err(Abort::Dataset)?,
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        let concurrency = problem
            .settings
            .case_concurrency
            .unwrap_or(self.config.case_concurrency)
            .max(1);

        let outcomes = self
            .run_cases(
                &cases,
                &limits,
                dataset,
                &request.query_text,
                concurrency,
                remaining,
                cancel,
            )
            .await;

        // cases interrupted by an infrastructure failure are not graded
        if let Some(msg) = outcomes.iter().find_map(|o| match o {
            CaseOutcome::Infrastructure(msg) => Some(msg.clone()),
            _ => None,
        }) {
            return Err(Abort::Infrastructure(msg));
        }

        let scorer = Scorer::for_mode(problem.settings.scoring);
        let mut results = Vec::with_capacity(cases.len());
        for (tc, outcome) in cases.iter().zip(outcomes) {
            let mut r = match outcome {
                CaseOutcome::Graded(r) => r,
                CaseOutcome::Interrupted if cancel.is_cancelled() => return Err(Abort::Cancelled),
                CaseOutcome::Interrupted => budget_exceeded(tc, budget),
                CaseOutcome::Infrastructure(msg) => return Err(Abort::Infrastructure(msg)),
            };
            scorer.grade_case(&mut r);
            results.push(r);
        }

        machine.transition(SubmissionState::Aggregating)?;
        let weights: Vec<f64> = cases.iter().map(TestCase::weight).collect();
        let verdict = scorer.score(&results, &weights);
        let execution_stats = stats::aggregate(&results);
        machine.transition(SubmissionState::Completed)?;

        Ok(SubmissionResult {
            success: true,
            is_correct: verdict.is_correct,
            score: verdict.score,
            feedback: verdict.feedback,
            test_results: results,
            submission_id: submission_id.to_string(),
            execution_stats,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_cases(
        &self,
        cases: &[TestCase],
        limits: &[SandboxLimits],
        dataset: Arc<Dataset>,
        query: &str,
        concurrency: usize,
        budget: Duration,
        external: &CancelSignal,
    ) -> Vec<CaseOutcome> {
        let (stop, stop_signal) = cancel::pair();
        let watchdog = {
            let stop = stop.clone();
            let external = external.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(budget) => {
                        tracing::warn!(event = "submission_deadline", budget_ms = budget.as_millis() as u64);
                    }
                    _ = external.cancelled() => {
                        tracing::info!(event = "submission_cancelled");
                    }
                }
                stop.cancel();
            })
        };

        let sem = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(cases.len());
        for (tc, lim) in cases.iter().zip(limits) {
            let permit = tokio::select! {
                biased;
                _ = stop_signal.cancelled() => None,
                p = sem.clone().acquire_owned() => p.ok(),
            };
            let Some(permit) = permit else { break };

            let executor = self.executor.clone();
            let dataset = dataset.clone();
            let tc = tc.clone();
            let query = query.to_string();
            let lim = *lim;
            let signal = stop_signal.clone();
            let stop = stop.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = run_case(executor, dataset, &tc, &query, lim, signal).await;
                if let CaseOutcome::Infrastructure(reason) = &outcome {
                    // no further permits are handed out and in-flight cases unwind
                    tracing::warn!(event = "case_infrastructure_failure", test_case_id = %tc.id, reason = %reason);
                    stop.cancel();
                }
                outcome
            }));
        }

        // declaration order, whatever order the cases finished in
        let mut outcomes = Vec::with_capacity(cases.len());
        for (i, h) in handles.into_iter().enumerate() {
            let outcome = match h.await {
                Ok(o) => o,
                Err(e) => {
                    tracing::error!(event = "case_task_failed", test_case_id = %cases[i].id, error = %e);
                    CaseOutcome::Infrastructure(format!("test case task failed: {}", e))
                }
            };
            outcomes.push(outcome);
        }
        while outcomes.len() < cases.len() {
            outcomes.push(CaseOutcome::Interrupted);
        }

        watchdog.abort();
        outcomes
    }

    fn persist(&self, submission: &Submission, result: &SubmissionResult) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.insert_submission(submission, result) {
            tracing::error!(
                event = "submission_persist_failed",
                submission_id = %submission.id,
                error = %e
            );
        }
    }
}

/// "run" executes the first public case only (or the first case when every
/// case is hidden); "submit" executes every case.
pub fn select_cases(problem: &Problem, mode: Mode) -> Vec<TestCase> {
    match mode {
        Mode::Submit => problem.tests.clone(),
        Mode::Run => problem
            .public_cases()
            .next()
            .or_else(|| problem.tests.first())
            .cloned()
            .into_iter()
            .collect(),
    }
}

/// Case override, then problem settings, then engine defaults.
pub fn case_limits(config: &EngineConfig, problem: &Problem, tc: &TestCase) -> SandboxLimits {
    let over = tc.limits.unwrap_or_default();
    let s = &problem.settings;
    let timeout_ms = over
        .timeout_ms
        .or(s.timeout_ms)
        .unwrap_or(config.timeout_ms)
        .max(1);
    let max_rows = over.max_rows.or(s.max_rows).unwrap_or(config.max_rows);
    let max_memory_mb = over
        .max_memory_mb
        .or(s.max_memory_mb)
        .unwrap_or(config.max_memory_mb);
    SandboxLimits {
        timeout: Duration::from_millis(timeout_ms),
        max_rows,
        max_memory_bytes: max_memory_mb.saturating_mul(1024 * 1024),
    }
}

async fn run_case(
    executor: Arc<dyn QueryExecutor>,
    dataset: Arc<Dataset>,
    tc: &TestCase,
    query: &str,
    limits: SandboxLimits,
    stop: CancelSignal,
) -> CaseOutcome {
    if stop.is_cancelled() {
        return CaseOutcome::Interrupted;
    }

    let mut phase = CasePhase::Pending.advance();
    tracing::trace!(event = "case_phase", test_case_id = %tc.id, phase = ?phase);
    let started = Instant::now();
    let executed = executor.execute(dataset, query, limits, stop).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let raw = match executed {
        Ok(raw) => raw,
        Err(e) => {
            return match e.status() {
                Some(status) => {
                    // rejected statements never reach the engine
                    let time = if status == ExecutionStatus::ForbiddenStatement {
                        0
                    } else {
                        elapsed_ms
                    };
                    tracing::debug!(
                        event = "case_done",
                        test_case_id = %tc.id,
                        status = status.as_str(),
                        elapsed_ms = time
                    );
                    CaseOutcome::Graded(failed_result(tc, status, e.user_message(), time))
                }
                None => match e {
                    ExecutionError::Cancelled => CaseOutcome::Interrupted,
                    other => CaseOutcome::Infrastructure(other.to_string()),
                },
            };
        }
    };

    phase = phase.advance();
    tracing::trace!(event = "case_phase", test_case_id = %tc.id, phase = ?phase);
    let actual = normalize(&raw);

    phase = phase.advance();
    tracing::trace!(event = "case_phase", test_case_id = %tc.id, phase = ?phase);
    let comparison = compare(&actual, &tc.expected, &tc.compare);

    phase = phase.advance();
    tracing::debug!(
        event = "case_done",
        test_case_id = %tc.id,
        status = "success",
        output_matches = comparison.output_matches,
        rows = actual.len(),
        elapsed_ms = elapsed_ms,
        phase = ?phase
    );

    CaseOutcome::Graded(TestResult {
        test_case_id: tc.id.clone(),
        test_case_name: tc.display_name().to_string(),
        is_hidden: tc.hidden,
        is_correct: false,
        score: 0.0,
        feedback: Vec::new(),
        execution_time_ms: elapsed_ms,
        execution_status: ExecutionStatus::Success,
        validation_details: comparison.details,
        user_output: actual,
        expected_output: tc.expected.clone(),
        output_matches: comparison.output_matches,
        error_message: None,
        memory_used_bytes: raw.memory_bytes,
        redacted: false,
    })
}

/// A case that produced no rows. Every expected row is still accounted for
/// as a missing row.
fn failed_result(
    tc: &TestCase,
    status: ExecutionStatus,
    message: String,
    execution_time_ms: u64,
) -> TestResult {
    let details = compare(&[], &tc.expected, &tc.compare).details;
    TestResult {
        test_case_id: tc.id.clone(),
        test_case_name: tc.display_name().to_string(),
        is_hidden: tc.hidden,
        is_correct: false,
        score: 0.0,
        feedback: Vec::new(),
        execution_time_ms,
        execution_status: status,
        validation_details: details,
        user_output: Vec::new(),
        expected_output: tc.expected.clone(),
        output_matches: false,
        error_message: Some(message),
        memory_used_bytes: 0,
        redacted: false,
    }
}

fn budget_exceeded(tc: &TestCase, budget: Duration) -> TestResult {
    failed_result(
        tc,
        ExecutionStatus::Timeout,
        format!(
            "submission exceeded its {}ms time budget before this case finished",
            budget.as_millis()
        ),
        0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_problem;
    use crate::model::LimitOverrides;

    const PROBLEM: &str = r#"
id: limits
settings: { timeout_ms: 3000, max_rows: 50 }
tables:
  - name: t
    columns: [{ name: x, type: INTEGER }]
    rows: [{ x: 1 }]
tests:
  - id: hidden-first
    hidden: true
    expected: [{ x: 1 }]
  - id: public
    limits: { timeout_ms: 100 }
    expected: [{ x: 1 }]
  - id: public-2
    expected: [{ x: 1 }]
"#;

    #[test]
    fn test_limit_precedence() {
        let p = parse_problem(PROBLEM, true).unwrap();
        let cfg = EngineConfig::default();
        let a = case_limits(&cfg, &p, &p.tests[0]);
        assert_eq!(a.timeout, Duration::from_millis(3000));
        assert_eq!(a.max_rows, 50);
        assert_eq!(a.max_memory_bytes, cfg.max_memory_mb * 1024 * 1024);

        let b = case_limits(&cfg, &p, &p.tests[1]);
        assert_eq!(b.timeout, Duration::from_millis(100));

        let mut tc = p.tests[2].clone();
        tc.limits = Some(LimitOverrides {
            max_memory_mb: Some(1),
            ..Default::default()
        });
        assert_eq!(case_limits(&cfg, &p, &tc).max_memory_bytes, 1024 * 1024);
    }

    #[test]
    fn test_run_mode_picks_first_public_case() {
        let p = parse_problem(PROBLEM, true).unwrap();
        let run = select_cases(&p, Mode::Run);
        assert_eq!(run.len(), 1);
        assert_eq!(run[0].id, "public");
        assert_eq!(select_cases(&p, Mode::Submit).len(), 3);

        let all_hidden = parse_problem(&PROBLEM.replace("  - id: public", "  - hidden: true\n    id: public"), true).unwrap();
        assert_eq!(select_cases(&all_hidden, Mode::Run)[0].id, "hidden-first");
    }

    #[test]
    fn test_failed_result_keeps_coverage() {
        let p = parse_problem(PROBLEM, true).unwrap();
        let r = failed_result(&p.tests[0], ExecutionStatus::Timeout, "slow".into(), 5);
        assert_eq!(r.validation_details.row_comparisons.len(), 1);
        assert!(r.validation_details.row_comparisons[0].actual_row.is_none());
        assert!(!r.output_matches);
    }
}
