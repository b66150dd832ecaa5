use std::fmt;

use crate::platform::CommitStatus;
use crate::policy::LabelMutation;
use crate::worker::Job;

/// One platform operation the router wants applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Label(LabelMutation),
    /// Create the repository label before it is first attached.
    EnsureRepoLabel { name: String, color: &'static str },
    /// `derived_from` names the labels the status was computed from. The
    /// status is skipped when any of them failed to apply.
    SetStatus {
        sha: String,
        status: CommitStatus,
        derived_from: Vec<String>,
    },
    Comment(String),
    /// Post `body` unless a comment already contains `marker`.
    CommentOnce { marker: String, body: String },
    RequestReviewers(Vec<String>),
    AddAssignee(String),
    /// Open the tracking issue unless one with `title` is already open.
    CreateTrackingIssue {
        title: String,
        body: String,
        assignee: Option<String>,
    },
    CloseTrackingIssue { title: String, comment: String },
    Enqueue(Job),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Label(mutation) => write!(f, "{mutation}"),
            Action::EnsureRepoLabel { name, color } => write!(f, "ensure repository label `{name}` (#{color})"),
            Action::SetStatus { status, .. } => {
                write!(f, "set status `{}` to {} ({})", status.context, status.state, status.description)
            }
            Action::Comment(body) => write!(f, "comment: {}", first_line(body)),
            Action::CommentOnce { body, .. } => write!(f, "comment once: {}", first_line(body)),
            Action::RequestReviewers(reviewers) => write!(f, "request reviewers {}", reviewers.join(", ")),
            Action::AddAssignee(user) => write!(f, "assign {user}"),
            Action::CreateTrackingIssue { title, .. } => write!(f, "open tracking issue \"{title}\""),
            Action::CloseTrackingIssue { title, .. } => write!(f, "close tracking issue \"{title}\""),
            Action::Enqueue(job) => write!(f, "enqueue {job}"),
        }
    }
}

/// First non-empty line, skipping HTML comment markers.
fn first_line(body: &str) -> &str {
    body.lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("<!--"))
        .unwrap_or("")
}

/// Ordered operations computed for one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub repository: String,
    pub number: u64,
    pub event: String,
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn label_mutations(&self) -> impl Iterator<Item = &LabelMutation> {
        self.actions.iter().filter_map(|action| match action {
            Action::Label(mutation) => Some(mutation),
            _ => None,
        })
    }

    pub fn statuses(&self) -> impl Iterator<Item = &CommitStatus> {
        self.actions.iter().filter_map(|action| match action {
            Action::SetStatus { status, .. } => Some(status),
            _ => None,
        })
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.actions.iter().filter_map(|action| match action {
            Action::Enqueue(job) => Some(job),
            _ => None,
        })
    }
}
