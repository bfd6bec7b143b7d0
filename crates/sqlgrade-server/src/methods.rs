use crate::cache::ProblemCache;
use serde::Serialize;
use serde_json::Value;
use sqlgrade_core::engine::{CancelSignal, WorkerPool};
use sqlgrade_core::model::GradeRequest;
use sqlgrade_core::redaction::render_for_submitter;
use std::path::PathBuf;
use std::time::Instant;

pub struct MethodContext {
    pub problem_root_canon: PathBuf,
    pub problems: ProblemCache,
    pub pool: WorkerPool,
    /// Fires when the caller disconnects.
    pub shutdown: CancelSignal,
}

#[derive(Debug, Serialize)]
pub struct MethodError {
    pub code: String,
    pub message: String,
}

impl MethodError {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// JSON-RPC error code for this application error.
    pub fn rpc_code(&self) -> i32 {
        match self.code.as_str() {
            "E_INVALID_PARAMS" | "E_INVALID_REQUEST" => -32602,
            _ => -32000,
        }
    }
}

pub fn health(ctx: &MethodContext) -> Value {
    serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "workers": ctx.pool.workers(),
        "idle": ctx.pool.idle(),
    })
}

pub async fn grade(ctx: &MethodContext, rid: &str, params: Value) -> Result<Value, MethodError> {
    let request: GradeRequest = serde_json::from_value(params)
        .map_err(|e| MethodError::new("E_INVALID_PARAMS", &e.to_string()))?;

    let path = crate::security::resolve_problem_path(&ctx.problem_root_canon, &request.problem_id)?;
    let problem = ctx.problems.load(&path)?;
    if problem.id != request.problem_id {
        return Err(MethodError::new(
            "E_PROBLEM_MISMATCH",
            &format!(
                "problem file declares id '{}', requested '{}'",
                problem.id, request.problem_id
            ),
        ));
    }

    let start = Instant::now();
    tracing::info!(
        event = "grade_start",
        rid = %rid,
        problem_id = %request.problem_id,
        submitter_id = %request.submitter_id,
        mode = ?request.mode,
        query_len = request.query_text.len()
    );

    let display = problem.settings.display;
    let result = ctx
        .pool
        .submit(problem, request, ctx.shutdown.clone())
        .await;

    tracing::info!(
        event = "grade_done",
        rid = %rid,
        submission_id = %result.submission_id,
        success = result.success,
        is_correct = result.is_correct,
        score = result.score,
        duration_ms = start.elapsed().as_millis() as u64
    );

    let shown = render_for_submitter(&result, display);
    serde_json::to_value(shown).map_err(|e| MethodError::new("E_INTERNAL", &e.to_string()))
}
