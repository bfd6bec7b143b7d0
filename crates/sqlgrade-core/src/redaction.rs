//! Caller-facing rendering of a [`SubmissionResult`].
//!
//! The engine keeps full detail internally. Anything shown to a submitter
//! goes through [`render_for_submitter`] first.

use crate::model::{DisplayPolicy, SubmissionResult, TestResult, ValidationDetails};

pub fn render_for_submitter(result: &SubmissionResult, policy: DisplayPolicy) -> SubmissionResult {
    let mut out = result.clone();
    let mut shown_public = false;

    for tr in &mut out.test_results {
        if tr.is_hidden {
            redact_hidden(tr);
            continue;
        }
        let show = match policy {
            DisplayPolicy::AllPublic => true,
            DisplayPolicy::FirstPublic => !shown_public,
        };
        shown_public = true;
        if !show {
            strip_rows(tr);
        }
    }
    out
}

/// Only pass/fail and the score contribution survive.
fn redact_hidden(tr: &mut TestResult) {
    tr.test_case_name = "hidden".into();
    tr.user_output.clear();
    tr.expected_output.clear();
    tr.error_message = None;
    tr.validation_details = ValidationDetails {
        row_comparisons: Vec::new(),
        matching_row_count: 0,
        total_row_count: 0,
        comparison_differences: Vec::new(),
    };
    tr.feedback = vec![if tr.is_correct { "passed" } else { "failed" }.to_string()];
    tr.redacted = true;
}

/// Keeps counts and case-level messages, drops the row data.
fn strip_rows(tr: &mut TestResult) {
    tr.user_output.clear();
    tr.expected_output.clear();
    for rc in &mut tr.validation_details.row_comparisons {
        rc.actual_row = None;
        rc.expected_row = None;
    }
    tr.redacted = true;
}
