use crate::errors::StateError;

/// Lifecycle of one submission. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Queued,
    Running,
    Aggregating,
    Completed,
    Failed,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionState::Completed | SubmissionState::Failed)
    }

    fn can_move_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Running, Aggregating)
                | (Aggregating, Completed)
                | (Queued, Failed)
                | (Running, Failed)
                | (Aggregating, Failed)
        )
    }
}

/// Per test case progress inside `Running`. There is no way back: a case
/// only ever advances to the next phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CasePhase {
    Pending,
    Executing,
    Normalizing,
    Comparing,
    Done,
}

impl CasePhase {
    pub fn advance(self) -> CasePhase {
        match self {
            CasePhase::Pending => CasePhase::Executing,
            CasePhase::Executing => CasePhase::Normalizing,
            CasePhase::Normalizing => CasePhase::Comparing,
            CasePhase::Comparing | CasePhase::Done => CasePhase::Done,
        }
    }
}

#[derive(Debug)]
pub struct StateMachine {
    submission_id: String,
    state: SubmissionState,
}

impl StateMachine {
    pub fn new(submission_id: &str) -> Self {
        Self {
            submission_id: submission_id.to_string(),
            state: SubmissionState::Queued,
        }
    }

    pub fn state(&self) -> SubmissionState {
        self.state
    }

    pub fn transition(&mut self, next: SubmissionState) -> Result<(), StateError> {
        if !self.state.can_move_to(next) {
            return Err(StateError {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(
            event = "submission_state",
            submission_id = %self.submission_id,
            from = ?self.state,
            to = ?next
        );
        self.state = next;
        Ok(())
    }
}
