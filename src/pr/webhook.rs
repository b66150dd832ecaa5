//! Webhook payload decoding.
//!
//! GitHub and GitLab deliveries are decoded into typed payloads and then
//! folded into a single [`WebhookEvent`]. Every action the router does not
//! handle still decodes, into an explicit `Other` variant, so new upstream
//! actions never disappear silently.

use serde::Deserialize;
use thiserror::Error;

use super::types::{Platform, ReviewVerdict};
use crate::policy::labels::VERIFIED_LABEL;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Failed to decode webhook payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported {platform} event: {event}")]
    UnsupportedEvent { platform: Platform, event: String },

    #[error("Webhook payload is missing `{0}`")]
    MissingField(&'static str),

    #[error("Event for #{0} does not belong to a pull request")]
    NotAPullRequest(u64),
}

/// A decoded delivery, independent of the platform it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub platform: Platform,
    pub repository: String,
    pub number: u64,
    pub sender: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    PullRequest(PullRequestAction),
    Comment(CommentAction),
    Review(ReviewAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestAction {
    Opened,
    Reopened,
    /// New commits were pushed to the head branch.
    Synchronize,
    Closed { merged: bool },
    Labeled(String),
    Unlabeled(String),
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentAction {
    Created { body: String },
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    Submitted(ReviewVerdict),
    /// An earlier approval was revoked (GitLab `unapproved`).
    Withdrawn,
    Other(String),
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::PullRequest(action) => match action {
                PullRequestAction::Opened => write!(f, "pull_request.opened"),
                PullRequestAction::Reopened => write!(f, "pull_request.reopened"),
                PullRequestAction::Synchronize => write!(f, "pull_request.synchronize"),
                PullRequestAction::Closed { merged: true } => write!(f, "pull_request.closed (merged)"),
                PullRequestAction::Closed { merged: false } => write!(f, "pull_request.closed"),
                PullRequestAction::Labeled(label) => write!(f, "pull_request.labeled ({label})"),
                PullRequestAction::Unlabeled(label) => write!(f, "pull_request.unlabeled ({label})"),
                PullRequestAction::Other(action) => write!(f, "pull_request.{action}"),
            },
            EventKind::Comment(CommentAction::Created { .. }) => write!(f, "issue_comment.created"),
            EventKind::Comment(CommentAction::Other(action)) => write!(f, "issue_comment.{action}"),
            EventKind::Review(ReviewAction::Submitted(verdict)) => {
                write!(f, "pull_request_review.submitted ({verdict})")
            }
            EventKind::Review(ReviewAction::Withdrawn) => write!(f, "pull_request_review.withdrawn"),
            EventKind::Review(ReviewAction::Other(action)) => write!(f, "pull_request_review.{action}"),
        }
    }
}

/// Decode a delivery.
///
/// `event` is the value of the `X-GitHub-Event` or `X-Gitlab-Event` header.
pub fn parse_event(platform: Platform, event: &str, body: &[u8]) -> Result<WebhookEvent, PayloadError> {
    match platform {
        Platform::GitHub => parse_github(event, body),
        Platform::GitLab => parse_gitlab(event, body),
    }
}

#[derive(Debug, Deserialize)]
struct GitHubPayload {
    action: Option<String>,
    number: Option<u64>,
    pull_request: Option<GitHubPullRequest>,
    label: Option<GitHubLabel>,
    comment: Option<GitHubComment>,
    review: Option<GitHubReview>,
    issue: Option<GitHubIssue>,
    sender: Option<GitHubUser>,
    repository: Option<GitHubRepository>,
}

#[derive(Debug, Deserialize)]
struct GitHubPullRequest {
    number: u64,
    #[serde(default)]
    merged: bool,
}

#[derive(Debug, Deserialize)]
struct GitHubLabel {
    name: String,
}

#[derive(Debug, Deserialize)]
struct GitHubComment {
    body: String,
}

#[derive(Debug, Deserialize)]
struct GitHubReview {
    state: String,
    user: GitHubUser,
}

#[derive(Debug, Deserialize)]
struct GitHubIssue {
    number: u64,
    pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GitHubRepository {
    full_name: String,
}

fn parse_github(event: &str, body: &[u8]) -> Result<WebhookEvent, PayloadError> {
    let payload: GitHubPayload = serde_json::from_slice(body)?;
    let action = payload.action.clone().unwrap_or_default();
    let repository = payload
        .repository
        .as_ref()
        .map(|r| r.full_name.clone())
        .ok_or(PayloadError::MissingField("repository"))?;
    let mut sender = payload.sender.as_ref().map(|s| s.login.clone()).unwrap_or_default();

    let (number, kind) = match event {
        "pull_request" => {
            let pull = payload
                .pull_request
                .as_ref()
                .ok_or(PayloadError::MissingField("pull_request"))?;
            let number = payload.number.unwrap_or(pull.number);
            let kind = match action.as_str() {
                "opened" => PullRequestAction::Opened,
                "reopened" => PullRequestAction::Reopened,
                "synchronize" => PullRequestAction::Synchronize,
                "closed" => PullRequestAction::Closed { merged: pull.merged },
                "labeled" | "unlabeled" => {
                    let label = payload
                        .label
                        .as_ref()
                        .map(|l| l.name.clone())
                        .ok_or(PayloadError::MissingField("label"))?;
                    if action == "labeled" {
                        PullRequestAction::Labeled(label)
                    } else {
                        PullRequestAction::Unlabeled(label)
                    }
                }
                other => PullRequestAction::Other(other.to_string()),
            };
            (number, EventKind::PullRequest(kind))
        }
        "issue_comment" => {
            let issue = payload.issue.as_ref().ok_or(PayloadError::MissingField("issue"))?;
            if issue.pull_request.is_none() {
                return Err(PayloadError::NotAPullRequest(issue.number));
            }
            let kind = match action.as_str() {
                "created" => {
                    let body = payload
                        .comment
                        .as_ref()
                        .map(|c| c.body.clone())
                        .ok_or(PayloadError::MissingField("comment"))?;
                    CommentAction::Created { body }
                }
                other => CommentAction::Other(other.to_string()),
            };
            (issue.number, EventKind::Comment(kind))
        }
        "pull_request_review" => {
            let pull = payload
                .pull_request
                .as_ref()
                .ok_or(PayloadError::MissingField("pull_request"))?;
            let review = payload.review.as_ref().ok_or(PayloadError::MissingField("review"))?;
            sender = review.user.login.clone();
            let kind = match (action.as_str(), ReviewVerdict::parse(&review.state)) {
                ("submitted", Some(verdict)) => ReviewAction::Submitted(verdict),
                ("submitted", None) => ReviewAction::Other(format!("submitted:{}", review.state)),
                (other, _) => ReviewAction::Other(other.to_string()),
            };
            (pull.number, EventKind::Review(kind))
        }
        other => {
            return Err(PayloadError::UnsupportedEvent {
                platform: Platform::GitHub,
                event: other.to_string(),
            })
        }
    };

    Ok(WebhookEvent {
        platform: Platform::GitHub,
        repository,
        number,
        sender,
        kind,
    })
}

#[derive(Debug, Deserialize)]
struct GitLabPayload {
    user: GitLabUser,
    project: GitLabProject,
    object_attributes: serde_json::Value,
    merge_request: Option<GitLabMergeRequestRef>,
    changes: Option<GitLabChanges>,
}

#[derive(Debug, Deserialize)]
struct GitLabUser {
    username: String,
}

#[derive(Debug, Deserialize)]
struct GitLabProject {
    path_with_namespace: String,
}

#[derive(Debug, Deserialize)]
struct GitLabMergeRequestAttributes {
    iid: u64,
    action: Option<String>,
    oldrev: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GitLabNoteAttributes {
    note: String,
    noteable_type: String,
}

#[derive(Debug, Deserialize)]
struct GitLabMergeRequestRef {
    iid: u64,
}

#[derive(Debug, Deserialize)]
struct GitLabChanges {
    labels: Option<GitLabLabelChange>,
}

#[derive(Debug, Deserialize)]
struct GitLabLabelChange {
    #[serde(default)]
    previous: Vec<GitLabLabel>,
    #[serde(default)]
    current: Vec<GitLabLabel>,
}

#[derive(Debug, Deserialize)]
struct GitLabLabel {
    title: String,
}

fn parse_gitlab(event: &str, body: &[u8]) -> Result<WebhookEvent, PayloadError> {
    let payload: GitLabPayload = serde_json::from_slice(body)?;
    let repository = payload.project.path_with_namespace.clone();
    let sender = payload.user.username.clone();

    let (number, kind) = match event {
        "Merge Request Hook" => {
            let attrs: GitLabMergeRequestAttributes =
                serde_json::from_value(payload.object_attributes.clone())?;
            let action = attrs.action.clone().unwrap_or_default();
            let kind = match action.as_str() {
                "open" => EventKind::PullRequest(PullRequestAction::Opened),
                "reopen" => EventKind::PullRequest(PullRequestAction::Reopened),
                "merge" => EventKind::PullRequest(PullRequestAction::Closed { merged: true }),
                "close" => EventKind::PullRequest(PullRequestAction::Closed { merged: false }),
                "approved" | "approval" => EventKind::Review(ReviewAction::Submitted(ReviewVerdict::Approved)),
                "unapproved" | "unapproval" => EventKind::Review(ReviewAction::Withdrawn),
                "update" if attrs.oldrev.is_some() => EventKind::PullRequest(PullRequestAction::Synchronize),
                "update" => EventKind::PullRequest(label_change(payload.changes.as_ref())),
                other => EventKind::PullRequest(PullRequestAction::Other(other.to_string())),
            };
            (attrs.iid, kind)
        }
        "Note Hook" => {
            let attrs: GitLabNoteAttributes = serde_json::from_value(payload.object_attributes.clone())?;
            let merge_request = payload
                .merge_request
                .as_ref()
                .ok_or(PayloadError::MissingField("merge_request"))?;
            if attrs.noteable_type != "MergeRequest" {
                return Err(PayloadError::NotAPullRequest(merge_request.iid));
            }
            (
                merge_request.iid,
                EventKind::Comment(CommentAction::Created { body: attrs.note }),
            )
        }
        other => {
            return Err(PayloadError::UnsupportedEvent {
                platform: Platform::GitLab,
                event: other.to_string(),
            })
        }
    };

    Ok(WebhookEvent {
        platform: Platform::GitLab,
        repository,
        number,
        sender,
        kind,
    })
}

/// GitLab reports label edits as a before/after pair on `update`.
///
/// A single edit can touch several labels; the `verified` change wins since
/// it is the only one that drives a commit status, otherwise the first
/// difference is reported.
fn label_change(changes: Option<&GitLabChanges>) -> PullRequestAction {
    let Some(change) = changes.and_then(|c| c.labels.as_ref()) else {
        return PullRequestAction::Other("update".to_string());
    };

    fn contains(set: &[GitLabLabel], label: &str) -> bool {
        set.iter().any(|l| l.title.eq_ignore_ascii_case(label))
    }

    let added: Vec<&String> = change
        .current
        .iter()
        .map(|l| &l.title)
        .filter(|l| !contains(&change.previous, l))
        .collect();
    let removed: Vec<&String> = change
        .previous
        .iter()
        .map(|l| &l.title)
        .filter(|l| !contains(&change.current, l))
        .collect();

    if let Some(label) = added.iter().find(|l| l.eq_ignore_ascii_case(VERIFIED_LABEL)) {
        return PullRequestAction::Labeled((*label).clone());
    }
    if let Some(label) = removed.iter().find(|l| l.eq_ignore_ascii_case(VERIFIED_LABEL)) {
        return PullRequestAction::Unlabeled((*label).clone());
    }
    match (added.first(), removed.first()) {
        (Some(label), _) => PullRequestAction::Labeled((*label).clone()),
        (None, Some(label)) => PullRequestAction::Unlabeled((*label).clone()),
        (None, None) => PullRequestAction::Other("update".to_string()),
    }
}
