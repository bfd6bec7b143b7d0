use super::cancel::CancelSignal;
use super::grader::Grader;
use crate::fingerprint;
use crate::model::{GradeRequest, Problem, SubmissionResult};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Bounded pool of concurrent submissions. Each accepted submission runs on
/// its own task; callers beyond `workers` wait for a free slot.
#[derive(Clone)]
pub struct WorkerPool {
    grader: Grader,
    sem: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(grader: Grader, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            grader,
            sem: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    pub fn grader(&self) -> &Grader {
        &self.grader
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Slots not currently grading.
    pub fn idle(&self) -> usize {
        self.sem.available_permits()
    }

    pub async fn submit(
        &self,
        problem: Arc<Problem>,
        request: GradeRequest,
        cancel: CancelSignal,
    ) -> SubmissionResult {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return not_started(&request, "Grading was cancelled before it started.");
            }
            p = self.sem.clone().acquire_owned() => p,
        };
        let permit = match permit {
            Ok(p) => p,
            Err(_) => return not_started(&request, "Grading pool is shut down."),
        };

        let grader = self.grader.clone();
        let req = request.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            grader.grade_with_cancel(&problem, &req, cancel).await
        });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(event = "submission_task_failed", problem_id = %request.problem_id, error = %e);
                not_started(
                    &request,
                    "Grading could not complete due to an internal error. Please retry.",
                )
            }
        }
    }

    /// Stops accepting submissions; in-flight ones finish.
    pub fn close(&self) {
        self.sem.close();
    }
}

fn not_started(request: &GradeRequest, message: &str) -> SubmissionResult {
    let id = fingerprint::submission_id(
        &request.problem_id,
        &request.submitter_id,
        &request.query_text,
        &chrono::Utc::now(),
    );
    SubmissionResult::failed(&id, message)
}
