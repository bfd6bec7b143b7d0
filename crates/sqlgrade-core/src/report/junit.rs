use crate::model::{ExecutionStatus, SubmissionResult};
use std::path::Path;

/// One `<testcase>` per graded case, for CI runs that check reference
/// solutions against their problems.
pub fn write_junit(problem_id: &str, result: &SubmissionResult, out: &Path) -> anyhow::Result<()> {
    std::fs::write(out, render(problem_id, result))?;
    Ok(())
}

pub fn render(problem_id: &str, result: &SubmissionResult) -> String {
    let failures = result.test_results.iter().filter(|r| !r.is_correct).count();
    let mut xml = String::new();
    xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
    xml.push('\n');
    xml.push_str(&format!(
        r#"<testsuite name="{}" tests="{}" failures="{}">"#,
        escape(problem_id),
        result.test_results.len(),
        failures
    ));
    xml.push('\n');

    if !result.success {
        let msg = result.feedback.first().map(String::as_str).unwrap_or("grading failed");
        xml.push_str(&format!(
            r#"  <testcase name="grading"><error message="{}"/></testcase>"#,
            escape(msg)
        ));
        xml.push('\n');
    }

    for r in &result.test_results {
        xml.push_str(&format!(
            r#"  <testcase name="{}" time="{:.3}">"#,
            escape(&r.test_case_id),
            r.execution_time_ms as f64 / 1000.0
        ));
        if !r.is_correct {
            let msg = r.feedback.first().cloned().unwrap_or_default();
            match r.execution_status {
                ExecutionStatus::Success => {
                    xml.push_str(&format!(r#"<failure message="{}"/>"#, escape(&msg)))
                }
                other => xml.push_str(&format!(
                    r#"<failure type="{}" message="{}"/>"#,
                    other.as_str(),
                    escape(&msg)
                )),
            }
        }
        xml.push_str("</testcase>\n");
    }

    xml.push_str("</testsuite>\n");
    xml
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
