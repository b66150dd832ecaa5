//! Background execution of checks and cherry-picks.
//!
//! The dispatch path only enqueues [`Job`]s; a single worker task drains the
//! bounded queue, runs each job through a [`JobRunner`] and publishes the
//! result (commit status, comment or cherry-pick pull request) through the
//! job's platform client.

pub mod runner;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::commands::sign;
use crate::config::CheckSpec;
use crate::platform::{CommitState, CommitStatus, PlatformClient, PlatformError};

pub use runner::GitRunner;

/// Characters of command output quoted in a failure comment.
const OUTPUT_TAIL_CHARS: usize = 3000;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("`{command}` failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Command could not be split into arguments: {0}")]
    InvalidCommand(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Long-running work requested by a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    RunCheck {
        check: CheckSpec,
        head_sha: String,
    },
    CherryPick {
        target_branch: String,
        commit_sha: String,
        source_title: String,
        requested_by: String,
    },
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::RunCheck { check, .. } => write!(f, "run check `{}`", check.name),
            Job::CherryPick { target_branch, .. } => write!(f, "cherry-pick into `{target_branch}`"),
        }
    }
}

/// A job plus what the worker needs to report back.
pub struct JobRequest {
    pub client: Arc<dyn PlatformClient>,
    pub number: u64,
    pub job: Job,
}

/// Sending half of the worker queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<JobRequest>,
}

impl JobQueue {
    /// Waits for queue capacity; fails only once the worker has stopped.
    pub async fn submit(&self, request: JobRequest) -> Result<(), JobRequest> {
        self.tx.send(request).await.map_err(|err| err.0)
    }
}

/// Output of a finished check command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Performs the git and process work of a job.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    /// Check out `head_sha` and run `command` in the working tree.
    async fn run_check(
        &self,
        clone_url: &str,
        head_ref: &str,
        head_sha: &str,
        command: &str,
    ) -> Result<CommandOutput, JobError>;

    /// Create `new_branch` from `target_branch`, cherry-pick `commit_sha`
    /// onto it and push it.
    async fn cherry_pick(
        &self,
        clone_url: &str,
        target_branch: &str,
        commit_sha: &str,
        new_branch: &str,
    ) -> Result<(), JobError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub number: u64,
    pub description: String,
    pub outcome: JobOutcome,
}

/// Start the worker. The handle resolves once every [`JobQueue`] clone is
/// dropped and the queue is drained.
pub fn spawn<R: JobRunner>(runner: R, capacity: usize) -> (JobQueue, JoinHandle<Vec<JobReport>>) {
    let (tx, mut rx) = mpsc::channel::<JobRequest>(capacity.max(1));
    let runner = Arc::new(runner);

    let handle = tokio::spawn(async move {
        let mut reports = Vec::new();
        while let Some(request) = rx.recv().await {
            let span = info_span!("job", number = request.number, job = %request.job);
            let report = handle_job(runner.as_ref(), request).instrument(span).await;
            reports.push(report);
        }
        info!(jobs = reports.len(), "worker drained");
        reports
    });

    (JobQueue { tx }, handle)
}

async fn handle_job<R: JobRunner>(runner: &R, request: JobRequest) -> JobReport {
    let JobRequest { client, number, job } = request;
    let description = job.to_string();

    let result = match &job {
        Job::RunCheck { check, head_sha } => run_check(runner, client.as_ref(), number, check, head_sha).await,
        Job::CherryPick {
            target_branch,
            commit_sha,
            source_title,
            requested_by,
        } => {
            cherry_pick(
                runner,
                client.as_ref(),
                number,
                target_branch,
                commit_sha,
                source_title,
                requested_by,
            )
            .await
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %err, "job could not report its result");
            JobOutcome::Failed(err.to_string())
        }
    };
    JobReport {
        number,
        description,
        outcome,
    }
}

async fn run_check<R: JobRunner>(
    runner: &R,
    client: &dyn PlatformClient,
    number: u64,
    check: &CheckSpec,
    head_sha: &str,
) -> Result<JobOutcome, JobError> {
    let head_ref = client.platform().head_ref(number);
    let result = runner
        .run_check(&client.clone_url(), &head_ref, head_sha, &check.command)
        .await;

    let (state, description, failure) = match result {
        Ok(output) if output.success => (CommitState::Success, "Passed".to_string(), None),
        Ok(output) => (CommitState::Failure, "Failed".to_string(), Some(output.output)),
        Err(err) => {
            warn!(check = %check.name, error = %err, "check could not run");
            (CommitState::Failure, "Error".to_string(), Some(err.to_string()))
        }
    };

    client
        .set_commit_status(head_sha, &CommitStatus::new(&check.name, state, &description))
        .await?;

    match failure {
        None => {
            info!(check = %check.name, "check passed");
            Ok(JobOutcome::Succeeded(format!("{} passed", check.name)))
        }
        Some(output) => {
            info!(check = %check.name, "check failed");
            let body = format!(
                "**{}** failed for {}.\n\n```\n{}\n```",
                check.name,
                short_sha(head_sha),
                output_tail(&output)
            );
            client.create_comment(number, &sign(&body)).await?;
            Ok(JobOutcome::Failed(format!("{} failed", check.name)))
        }
    }
}

async fn cherry_pick<R: JobRunner>(
    runner: &R,
    client: &dyn PlatformClient,
    number: u64,
    target_branch: &str,
    commit_sha: &str,
    source_title: &str,
    requested_by: &str,
) -> Result<JobOutcome, JobError> {
    if !client.branch_exists(target_branch).await? {
        warn!(target_branch, "cherry-pick target branch does not exist");
        let body = format!("Cherry-pick failed: target branch `{target_branch}` does not exist.");
        client.create_comment(number, &sign(&body)).await?;
        return Ok(JobOutcome::Failed(format!("branch {target_branch} does not exist")));
    }

    let new_branch = cherry_pick_branch(target_branch, commit_sha);
    match runner
        .cherry_pick(&client.clone_url(), target_branch, commit_sha, &new_branch)
        .await
    {
        Ok(()) => {
            let title = format!("CherryPicked: [{target_branch}] {source_title}");
            let body = format!(
                "Cherry-pick of #{number} ({}) into `{target_branch}`, requested by {requested_by}.",
                short_sha(commit_sha)
            );
            let url = client
                .create_pull_request(&new_branch, target_branch, &title, &body)
                .await?;
            client
                .create_comment(number, &sign(&format!("Cherry-picked into `{target_branch}`: {url}")))
                .await?;
            info!(target_branch, %url, "cherry-pick pull request opened");
            Ok(JobOutcome::Succeeded(url))
        }
        Err(err) => {
            warn!(target_branch, error = %err, "cherry-pick failed");
            client
                .create_comment(
                    number,
                    &sign(&manual_cherry_pick(target_branch, commit_sha, &new_branch, &err)),
                )
                .await?;
            Ok(JobOutcome::Failed(err.to_string()))
        }
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

fn cherry_pick_branch(target_branch: &str, commit_sha: &str) -> String {
    format!("cherry-pick-{}-{target_branch}", short_sha(commit_sha))
}

fn manual_cherry_pick(target_branch: &str, commit_sha: &str, new_branch: &str, err: &JobError) -> String {
    format!(
        "Cherry-pick into `{target_branch}` failed:\n\n```\n{err}\n```\n\n\
         To finish it manually:\n\n```\n\
         git fetch origin {target_branch}\n\
         git checkout -b {new_branch} origin/{target_branch}\n\
         git cherry-pick -x {commit_sha}\n\
         git push origin {new_branch}\n```"
    )
}

/// Last [`OUTPUT_TAIL_CHARS`] characters of `output`.
fn output_tail(output: &str) -> &str {
    let total = output.chars().count();
    if total <= OUTPUT_TAIL_CHARS {
        return output.trim_end();
    }
    let start = output
        .char_indices()
        .nth(total - OUTPUT_TAIL_CHARS)
        .map(|(index, _)| index)
        .unwrap_or(0);
    output[start..].trim_end()
}
