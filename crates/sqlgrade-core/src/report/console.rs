use crate::model::{ExecutionStatus, SubmissionResult, TestResult};
use crate::row::CanonicalRow;

/// Rows shown per side before the table is cut off.
const MAX_TABLE_ROWS: usize = 20;

pub fn print_summary(result: &SubmissionResult) {
    eprint!("{}", format_summary(result));
}

pub fn format_summary(result: &SubmissionResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "\nSubmission {} ({} test cases)\n",
        result.submission_id,
        result.test_results.len()
    ));

    if !result.success {
        out.push_str("💥 grading failed\n");
        for f in &result.feedback {
            out.push_str(&format!("    {}\n", f));
        }
        return out;
    }

    for r in &result.test_results {
        out.push_str(&case_line(r));
        if !r.is_hidden && !r.is_correct {
            for f in &r.feedback {
                out.push_str(&format!("      → {}\n", f));
            }
        }
        if !r.is_hidden && !r.redacted && !r.is_correct && !r.user_output.is_empty() {
            out.push_str(&format_table("got", &r.user_output));
        }
        if !r.is_hidden && !r.redacted && !r.is_correct && !r.expected_output.is_empty() {
            out.push_str(&format_table("expected", &r.expected_output));
        }
    }

    out.push_str("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
    let verdict = if result.is_correct { "CORRECT" } else { "INCORRECT" };
    out.push_str(&format!(
        "Result: {}  score {:.1}  passed {}/{}  avg {:.1}ms  max {}ms  mem {:.2}MB\n",
        verdict,
        result.score,
        result.passed_count(),
        result.test_results.len(),
        result.execution_stats.avg_time_ms,
        result.execution_stats.max_time_ms,
        result.execution_stats.memory_used_mb
    ));
    out
}

fn case_line(r: &TestResult) -> String {
    let icon = match (r.is_correct, r.execution_status) {
        (true, _) => "✅",
        (false, ExecutionStatus::Success) => "❌",
        (false, ExecutionStatus::Timeout) => "⏱️ ",
        (false, ExecutionStatus::ForbiddenStatement) => "⛔",
        (false, _) => "💥",
    };
    let name = if r.is_hidden {
        "(hidden)".to_string()
    } else {
        r.test_case_name.clone()
    };
    format!(
        "{} {:<24} {:>6.1}  {:<18} ({}ms)\n",
        icon,
        name,
        r.score,
        r.execution_status.as_str(),
        r.execution_time_ms
    )
}

/// Plain fixed-width table of canonical rows.
pub fn format_table(label: &str, rows: &[CanonicalRow]) -> String {
    let Some(first) = rows.first() else {
        return format!("    {}: (no rows)\n", label);
    };
    let headers: Vec<String> = first.columns().map(str::to_string).collect();
    let shown = &rows[..rows.len().min(MAX_TABLE_ROWS)];
    let cells: Vec<Vec<String>> = shown
        .iter()
        .map(|r| {
            headers
                .iter()
                .map(|h| r.get(h).map(|c| c.to_string()).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |vals: &[String]| -> String {
        let padded: Vec<String> = vals
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!("{:<width$}", v, width = *w))
            .collect();
        format!("      | {} |\n", padded.join(" | "))
    };

    let mut out = format!("    {}:\n", label);
    out.push_str(&line(&headers));
    for row in &cells {
        out.push_str(&line(row));
    }
    if rows.len() > shown.len() {
        out.push_str(&format!("      ... {} more rows\n", rows.len() - shown.len()));
    }
    out
}
