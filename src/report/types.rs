use crate::worker::{JobOutcome, JobReport};

/// What happened to one planned action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionStatus {
    /// The platform state changed.
    Applied,
    /// The platform was already in the requested state.
    Unchanged,
    /// Not attempted because an action it depends on failed.
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    /// Human-readable form of the action
    pub action: String,
    pub status: ActionStatus,
}

/// Outcome of processing one delivery.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub repository: String,
    pub number: u64,
    /// Event name, e.g. `issue_comment.created`
    pub event: String,
    /// Delivery ID from the webhook headers, if known
    pub delivery: Option<String>,
    pub actions: Vec<ActionRecord>,
    /// Background jobs finished while the delivery was being processed
    pub jobs: Vec<JobReport>,
}

impl ExecutionReport {
    pub fn new(repository: &str, number: u64, event: &str) -> Self {
        Self {
            repository: repository.to_string(),
            number,
            event: event.to_string(),
            ..Self::default()
        }
    }

    fn count(&self, wanted: fn(&ActionStatus) -> bool) -> usize {
        self.actions.iter().filter(|record| wanted(&record.status)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(|status| matches!(status, ActionStatus::Applied))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|status| matches!(status, ActionStatus::Unchanged))
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, ActionStatus::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, ActionStatus::Failed(_)))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
            || self
                .jobs
                .iter()
                .any(|job| matches!(job.outcome, JobOutcome::Failed(_)))
    }
}
