use super::exit_codes;
use crate::cli::args::GradeArgs;
use anyhow::Context;
use sqlgrade_core::config::{load_problem, EngineConfig};
use sqlgrade_core::engine::Grader;
use sqlgrade_core::model::{GradeRequest, Mode, SubmissionResult};
use sqlgrade_core::redaction::render_for_submitter;
use sqlgrade_core::report;
use sqlgrade_core::storage::Store;
use std::path::PathBuf;

pub async fn run(args: GradeArgs, mode: Mode, db: Option<PathBuf>) -> anyhow::Result<i32> {
    let problem = match load_problem(&args.problem, false) {
        Ok(p) => p,
        Err(e) => {
            tracing::debug!(event = "cli_problem_rejected", path = %args.problem.display(), error = %e);
            eprintln!("❌ {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let query_text = match (&args.sql, &args.query) {
        (Some(sql), _) => sql.clone(),
        (None, Some(path)) => match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ failed to read query {}: {}", path.display(), e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        },
        (None, None) => {
            eprintln!("❌ one of --query or --sql is required");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    let mut grader = Grader::new(EngineConfig::from_env());
    if let Some(db) = &db {
        let store = match open_store(db) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("💥 {e:#}");
                return Ok(exit_codes::INFRA_ERROR);
            }
        };
        grader = grader.with_store(store);
    }

    let request = GradeRequest {
        problem_id: problem.id.clone(),
        submitter_id: args.submitter.clone(),
        query_text,
        mode,
    };
    tracing::debug!(
        event = "cli_grade",
        problem_id = %problem.id,
        mode = ?request.mode,
        persist = db.is_some(),
        query_len = request.query_text.len()
    );
    let result = grader.grade(&problem, &request).await;
    // one-shot process: drop the materialized dataset with it
    grader.loader().invalidate(&problem.id);
    if !result.success {
        tracing::warn!(event = "cli_grade_failed", submission_id = %result.submission_id);
    }

    let shown = if args.reveal_hidden {
        result.clone()
    } else {
        render_for_submitter(&result, problem.settings.display)
    };

    match args.format.as_str() {
        "json" => println!("{}", report::json::to_json(&shown)?),
        _ => report::console::print_summary(&shown),
    }
    if let Some(path) = &args.junit {
        report::junit::write_junit(&problem.id, &shown, path)
            .with_context(|| format!("failed to write junit report {}", path.display()))?;
    }

    Ok(exit_code(&result))
}

fn open_store(db: &std::path::Path) -> anyhow::Result<Store> {
    let store = Store::open(db)?;
    store.init_schema()?;
    Ok(store)
}

pub fn exit_code(result: &SubmissionResult) -> i32 {
    if !result.success {
        exit_codes::INFRA_ERROR
    } else if result.is_correct {
        exit_codes::OK
    } else {
        exit_codes::TEST_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        let failed = SubmissionResult::failed("sub-1", "dataset unavailable");
        assert_eq!(exit_code(&failed), exit_codes::INFRA_ERROR);

        let mut graded = failed.clone();
        graded.success = true;
        assert_eq!(exit_code(&graded), exit_codes::TEST_FAILED);
        graded.is_correct = true;
        assert_eq!(exit_code(&graded), exit_codes::OK);
    }
}
