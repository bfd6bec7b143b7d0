use crate::model::{ExecutionStats, TestResult};

const MIB: f64 = 1024.0 * 1024.0;

/// Timing and memory summary across a submission's test cases.
pub fn aggregate(results: &[TestResult]) -> ExecutionStats {
    if results.is_empty() {
        return ExecutionStats::default();
    }
    let total: u64 = results.iter().map(|r| r.execution_time_ms).sum();
    let max_time_ms = results.iter().map(|r| r.execution_time_ms).max().unwrap_or(0);
    let max_bytes = results.iter().map(|r| r.memory_used_bytes).max().unwrap_or(0);

    ExecutionStats {
        avg_time_ms: round2(total as f64 / results.len() as f64),
        max_time_ms,
        memory_used_mb: round2(max_bytes as f64 / MIB),
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionStatus, ValidationDetails};

    fn timed(ms: u64, bytes: u64) -> TestResult {
        TestResult {
            test_case_id: "t".into(),
            test_case_name: "t".into(),
            is_hidden: false,
            is_correct: true,
            score: 100.0,
            feedback: vec![],
            execution_time_ms: ms,
            execution_status: ExecutionStatus::Success,
            validation_details: ValidationDetails::default(),
            user_output: vec![],
            expected_output: vec![],
            output_matches: true,
            error_message: None,
            memory_used_bytes: bytes,
            redacted: false,
        }
    }

    #[test]
    fn test_aggregate() {
        let s = aggregate(&[timed(10, 0), timed(25, 2 * 1024 * 1024), timed(1, 512)]);
        assert_eq!(s.avg_time_ms, 12.0);
        assert_eq!(s.max_time_ms, 25);
        assert_eq!(s.memory_used_mb, 2.0);
    }

    #[test]
    fn test_empty() {
        assert_eq!(aggregate(&[]), ExecutionStats::default());
    }
}
