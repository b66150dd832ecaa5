//! Applies a [`Plan`] through a platform client.
//!
//! Actions run in plan order. A failing action is recorded in the report and
//! the remaining actions still run, except statuses derived from a label
//! whose mutation failed. Those are skipped so the status keeps agreeing
//! with the label.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::commands::sign;
use crate::dispatch::{Action, Plan};
use crate::platform::{AddOutcome, CreateOutcome, PlatformClient, PlatformError, RemoveOutcome};
use crate::policy::LabelAction;
use crate::report::{ActionRecord, ActionStatus, ExecutionReport};
use crate::worker::{JobQueue, JobRequest};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("Job queue is not accepting jobs")]
    QueueClosed,
}

pub struct Executor {
    client: Arc<dyn PlatformClient>,
    queue: Option<JobQueue>,
}

impl Executor {
    /// Without a queue, `Enqueue` actions fail.
    pub fn new(client: Arc<dyn PlatformClient>, queue: Option<JobQueue>) -> Self {
        Self { client, queue }
    }

    #[instrument(skip_all, fields(repository = %plan.repository, number = plan.number, event = %plan.event))]
    pub async fn execute(&self, plan: &Plan) -> ExecutionReport {
        let mut report = ExecutionReport::new(&plan.repository, plan.number, &plan.event);
        let mut failed_labels = BTreeSet::new();

        for action in &plan.actions {
            if let Some(label) = stale_source(action, &failed_labels) {
                warn!(action = %action, label = %label, "skipping status derived from a failed label");
                report.actions.push(ActionRecord {
                    action: action.to_string(),
                    status: ActionStatus::Skipped(format!("label `{label}` was not updated")),
                });
                continue;
            }

            let status = match self.apply(plan.number, action).await {
                Ok(true) => ActionStatus::Applied,
                Ok(false) => {
                    debug!(action = %action, "already in requested state");
                    ActionStatus::Unchanged
                }
                Err(err) => {
                    warn!(action = %action, error = %err, "action failed");
                    if let Action::Label(mutation) = action {
                        failed_labels.insert(mutation.label.to_lowercase());
                    }
                    ActionStatus::Failed(err.to_string())
                }
            };
            report.actions.push(ActionRecord {
                action: action.to_string(),
                status,
            });
        }

        report
    }

    /// Apply one action. `Ok(false)` means nothing had to change.
    async fn apply(&self, number: u64, action: &Action) -> Result<bool, ExecutorError> {
        let client = self.client.as_ref();
        match action {
            Action::Label(mutation) => match mutation.action {
                LabelAction::Add => Ok(client.add_label(number, &mutation.label).await? == AddOutcome::Added),
                LabelAction::Remove => {
                    Ok(client.remove_label(number, &mutation.label).await? == RemoveOutcome::Removed)
                }
            },
            Action::EnsureRepoLabel { name, color } => {
                Ok(client.ensure_repo_label(name, color).await? == CreateOutcome::Created)
            }
            Action::SetStatus { sha, status, .. } => {
                client.set_commit_status(sha, status).await?;
                Ok(true)
            }
            Action::Comment(body) => {
                client.create_comment(number, &sign(body)).await?;
                Ok(true)
            }
            Action::CommentOnce { marker, body } => {
                let existing = client.list_comments(number).await?;
                if existing.iter().any(|comment| comment.contains(marker.as_str())) {
                    return Ok(false);
                }
                client.create_comment(number, &sign(body)).await?;
                Ok(true)
            }
            Action::RequestReviewers(reviewers) => {
                client.request_reviewers(number, reviewers).await?;
                Ok(true)
            }
            Action::AddAssignee(user) => {
                client.add_assignee(number, user).await?;
                Ok(true)
            }
            Action::CreateTrackingIssue { title, body, assignee } => {
                if client.find_open_issue(title).await?.is_some() {
                    return Ok(false);
                }
                let issue = client.create_issue(title, body, assignee.as_deref()).await?;
                debug!(issue, "opened tracking issue");
                Ok(true)
            }
            Action::CloseTrackingIssue { title, comment } => match client.find_open_issue(title).await? {
                Some(issue) => {
                    client.close_issue(issue, comment).await?;
                    Ok(true)
                }
                None => Ok(false),
            },
            Action::Enqueue(job) => {
                let queue = self.queue.as_ref().ok_or(ExecutorError::QueueClosed)?;
                let request = JobRequest {
                    client: Arc::clone(&self.client),
                    number,
                    job: job.clone(),
                };
                queue.submit(request).await.map_err(|_| ExecutorError::QueueClosed)?;
                Ok(true)
            }
        }
    }
}

/// The first label a status was derived from whose mutation failed.
fn stale_source<'a>(action: &'a Action, failed_labels: &BTreeSet<String>) -> Option<&'a str> {
    match action {
        Action::SetStatus { derived_from, .. } => derived_from
            .iter()
            .find(|label| failed_labels.contains(&label.to_lowercase()))
            .map(String::as_str),
        _ => None,
    }
}
