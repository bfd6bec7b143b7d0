//! Scorer: turns graded test results into a verdict and feedback.

use crate::model::{ExecutionStatus, ScoringMode, TestResult};

/// Credit a single test case earns, in `0.0..=1.0`.
pub trait PartialCredit: Send + Sync {
    fn credit(&self, result: &TestResult) -> f64;

    fn name(&self) -> &'static str;
}

/// Full credit only for a matching output.
pub struct BinaryCredit;

impl PartialCredit for BinaryCredit {
    fn credit(&self, result: &TestResult) -> f64 {
        if result.execution_status == ExecutionStatus::Success && result.output_matches {
            1.0
        } else {
            0.0
        }
    }

    fn name(&self) -> &'static str {
        "binary"
    }
}

/// Fraction of compared rows that matched. A failed execution earns nothing.
pub struct RowFractionCredit;

impl PartialCredit for RowFractionCredit {
    fn credit(&self, result: &TestResult) -> f64 {
        if result.execution_status != ExecutionStatus::Success {
            return 0.0;
        }
        if result.output_matches {
            return 1.0;
        }
        let d = &result.validation_details;
        if d.total_row_count == 0 {
            0.0
        } else {
            d.matching_row_count as f64 / d.total_row_count as f64
        }
    }

    fn name(&self) -> &'static str {
        "row_fraction"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub is_correct: bool,
    /// Weighted percentage, 0-100.
    pub score: f64,
    pub feedback: Vec<String>,
}

pub struct Scorer {
    credit: Box<dyn PartialCredit>,
}

impl Default for Scorer {
    fn default() -> Self {
        Self::new(Box::new(BinaryCredit))
    }
}

impl Scorer {
    pub fn new(credit: Box<dyn PartialCredit>) -> Self {
        Self { credit }
    }

    pub fn for_mode(mode: ScoringMode) -> Self {
        match mode {
            ScoringMode::Binary => Self::new(Box::new(BinaryCredit)),
            ScoringMode::RowFraction => Self::new(Box::new(RowFractionCredit)),
        }
    }

    pub fn credit_name(&self) -> &'static str {
        self.credit.name()
    }

    /// Fills in a case's own `is_correct`, `score` and `feedback`.
    pub fn grade_case(&self, result: &mut TestResult) {
        result.is_correct =
            result.execution_status == ExecutionStatus::Success && result.output_matches;
        result.score = round2(self.credit.credit(result).clamp(0.0, 1.0) * 100.0);
        result.feedback = case_feedback(result);
    }

    /// Aggregates graded cases. `weights[i]` belongs to `results[i]`; a
    /// missing or all-zero weighting falls back to equal weights.
    pub fn score(&self, results: &[TestResult], weights: &[f64]) -> Verdict {
        if results.is_empty() {
            return Verdict {
                is_correct: false,
                score: 0.0,
                feedback: vec!["No test cases were evaluated.".into()],
            };
        }

        let mut w: Vec<f64> = (0..results.len())
            .map(|i| weights.get(i).copied().unwrap_or(1.0).max(0.0))
            .collect();
        if w.iter().sum::<f64>() <= 0.0 {
            w = vec![1.0; results.len()];
        }
        let total: f64 = w.iter().sum();
        let earned: f64 = results
            .iter()
            .zip(&w)
            .map(|(r, w)| self.credit.credit(r).clamp(0.0, 1.0) * w)
            .sum();

        let score = round2(earned / total * 100.0);
        let passed = results.iter().filter(|r| r.is_correct).count();
        let is_correct = passed == results.len();

        Verdict {
            is_correct,
            score,
            feedback: submission_feedback(results, passed, score),
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn case_feedback(r: &TestResult) -> Vec<String> {
    if r.is_hidden {
        return vec![if r.is_correct { "passed" } else { "failed" }.to_string()];
    }
    if r.is_correct {
        return vec!["Output matches the expected result.".into()];
    }

    let mut out = vec![status_message(r)];
    if r.execution_status == ExecutionStatus::Success {
        out.extend(r.validation_details.comparison_differences.iter().cloned());
    }
    out
}

fn status_message(r: &TestResult) -> String {
    let detail = r.error_message.as_deref().unwrap_or_default();
    match r.execution_status {
        ExecutionStatus::Success => format!(
            "Output does not match: {} of {} rows correct.",
            r.validation_details.matching_row_count, r.validation_details.total_row_count
        ),
        ExecutionStatus::QueryError => format!("Query error: {}", detail),
        ExecutionStatus::Timeout => {
            "Query exceeded the time limit; look for unbounded joins or recursion.".into()
        }
        ExecutionStatus::ResourceExceeded => format!("Resource limit exceeded: {}", detail),
        ExecutionStatus::ForbiddenStatement => {
            "Only read-only SELECT queries are allowed.".to_string()
        }
    }
}

/// Submission-level feedback. Hidden cases contribute only their pass/fail
/// state and a position among hidden cases.
fn submission_feedback(results: &[TestResult], passed: usize, score: f64) -> Vec<String> {
    let mut out = vec![format!(
        "Passed {}/{} test cases (score {:.1}).",
        passed,
        results.len(),
        score
    )];

    let mut hidden_no = 0;
    for r in results {
        let verdict = if r.is_correct { "passed" } else { "failed" };
        if r.is_hidden {
            hidden_no += 1;
            out.push(format!("Hidden test case #{}: {}", hidden_no, verdict));
        } else if r.is_correct {
            out.push(format!("Test case '{}': passed", r.test_case_name));
        } else {
            out.push(format!(
                "Test case '{}': failed - {}",
                r.test_case_name,
                status_message(r)
            ));
        }
    }

    let public_ok = results.iter().filter(|r| !r.is_hidden).all(|r| r.is_correct);
    let hidden_failed = results.iter().any(|r| r.is_hidden && !r.is_correct);
    if passed == results.len() {
        out.push("All test cases passed.".into());
    } else if public_ok && hidden_failed {
        out.push(
            "Your query passes the visible examples but not every hidden check; consider edge cases such as NULL values, ties and empty groups."
                .into(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ValidationDetails;

    fn result(id: &str, hidden: bool, matches: bool) -> TestResult {
        TestResult {
            test_case_id: id.into(),
            test_case_name: id.into(),
            is_hidden: hidden,
            is_correct: false,
            score: 0.0,
            feedback: vec![],
            execution_time_ms: 1,
            execution_status: ExecutionStatus::Success,
            validation_details: ValidationDetails {
                row_comparisons: vec![],
                matching_row_count: if matches { 4 } else { 1 },
                total_row_count: 4,
                comparison_differences: vec![],
            },
            user_output: vec![],
            expected_output: vec![],
            output_matches: matches,
            error_message: None,
            memory_used_bytes: 0,
            redacted: false,
        }
    }

    fn graded(scorer: &Scorer, mut rs: Vec<TestResult>) -> Vec<TestResult> {
        for r in &mut rs {
            scorer.grade_case(r);
        }
        rs
    }

    #[test]
    fn test_equal_weights_binary() {
        let s = Scorer::default();
        let rs = graded(&s, vec![result("a", false, true), result("b", true, false)]);
        let v = s.score(&rs, &[1.0, 1.0]);
        assert_eq!(v.score, 50.0);
        assert!(!v.is_correct);
        assert_eq!(rs[0].score, 100.0);
        assert_eq!(rs[1].score, 0.0);
    }

    #[test]
    fn test_all_pass_is_correct() {
        let s = Scorer::default();
        let rs = graded(&s, vec![result("a", false, true), result("b", true, true)]);
        let v = s.score(&rs, &[]);
        assert!(v.is_correct);
        assert_eq!(v.score, 100.0);
        assert_eq!(v.feedback.last().unwrap(), "All test cases passed.");
    }

    #[test]
    fn test_weights() {
        let s = Scorer::default();
        let rs = graded(&s, vec![result("a", false, true), result("b", false, false)]);
        assert_eq!(s.score(&rs, &[3.0, 1.0]).score, 75.0);
        assert_eq!(s.score(&rs, &[0.0, 0.0]).score, 50.0);
    }

    #[test]
    fn test_row_fraction_credit() {
        let s = Scorer::for_mode(ScoringMode::RowFraction);
        let rs = graded(&s, vec![result("a", false, false)]);
        assert_eq!(rs[0].score, 25.0);
        assert!(!rs[0].is_correct);
        let v = s.score(&rs, &[1.0]);
        assert_eq!(v.score, 25.0);
        assert!(!v.is_correct);
    }

    #[test]
    fn test_failed_execution_earns_nothing() {
        let s = Scorer::for_mode(ScoringMode::RowFraction);
        let mut r = result("a", false, false);
        r.execution_status = ExecutionStatus::Timeout;
        let rs = graded(&s, vec![r]);
        assert_eq!(rs[0].score, 0.0);
        assert!(rs[0].feedback[0].contains("time limit"));
    }

    #[test]
    fn test_hidden_feedback_carries_no_detail() {
        let s = Scorer::default();
        let mut hidden = result("secret-case", true, false);
        hidden.validation_details.comparison_differences = vec!["n: expected 42, got 7".into()];
        hidden.error_message = Some("no such column: salary".into());
        hidden.execution_status = ExecutionStatus::QueryError;
        let rs = graded(&s, vec![result("a", false, true), hidden]);
        assert_eq!(rs[1].feedback, vec!["failed".to_string()]);

        let v = s.score(&rs, &[]);
        let all = v.feedback.join("\n");
        assert!(all.contains("Hidden test case #1: failed"));
        assert!(!all.contains("secret-case"));
        assert!(!all.contains("42"));
        assert!(!all.contains("salary"));
        assert!(all.contains("edge cases"));
    }

    #[test]
    fn test_public_query_error_is_verbatim() {
        let s = Scorer::default();
        let mut r = result("a", false, false);
        r.execution_status = ExecutionStatus::QueryError;
        r.error_message = Some("near \"SELEC\": syntax error".into());
        let rs = graded(&s, vec![r]);
        assert_eq!(rs[0].feedback[0], "Query error: near \"SELEC\": syntax error");
    }
}
