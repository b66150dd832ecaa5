//! In-memory platform used by executor, router and worker tests.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{AddOutcome, CommitStatus, CreateOutcome, PlatformClient, PlatformError, RemoveOutcome};
use crate::pr::{Platform, PullRequestContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryIssue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub assignee: Option<String>,
    pub open: bool,
    pub comments: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MemoryState {
    pub pull_request: PullRequestContext,
    pub repo_labels: BTreeSet<String>,
    pub statuses: Vec<(String, CommitStatus)>,
    pub comments: Vec<String>,
    pub issues: Vec<MemoryIssue>,
    pub requested_reviewers: Vec<String>,
    pub assignees: Vec<String>,
    pub branches: BTreeSet<String>,
    pub opened_pull_requests: Vec<(String, String, String)>,
    /// Operations (by trait method name) that fail with a 500.
    pub failing: BTreeSet<&'static str>,
    /// Number of mutating calls that reached the platform.
    pub calls: usize,
}

pub struct MemoryClient {
    state: Mutex<MemoryState>,
}

impl MemoryClient {
    pub fn new(pull_request: PullRequestContext) -> Self {
        let mut branches = BTreeSet::new();
        branches.insert(pull_request.base_branch.clone());
        Self {
            state: Mutex::new(MemoryState {
                pull_request,
                repo_labels: BTreeSet::new(),
                statuses: Vec::new(),
                comments: Vec::new(),
                issues: Vec::new(),
                requested_reviewers: Vec::new(),
                assignees: Vec::new(),
                branches,
                opened_pull_requests: Vec::new(),
                failing: BTreeSet::new(),
                calls: 0,
            }),
        }
    }

    pub fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub fn add_branch(&self, branch: &str) {
        self.state.lock().unwrap().branches.insert(branch.to_string());
    }

    pub fn snapshot(&self) -> MemoryState {
        self.state.lock().unwrap().clone()
    }

    /// Latest status posted for `context`.
    pub fn status(&self, context: &str) -> Option<CommitStatus> {
        self.snapshot()
            .statuses
            .into_iter()
            .rev()
            .find(|(_, status)| status.context == context)
            .map(|(_, status)| status)
    }

    fn call<T>(&self, operation: &'static str, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, PlatformError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(operation) {
            return Err(PlatformError::Status {
                method: "POST".to_string(),
                url: format!("memory://{operation}"),
                status: 500,
                body: "injected failure".to_string(),
            });
        }
        state.calls += 1;
        Ok(f(&mut *state))
    }
}

#[async_trait]
impl PlatformClient for MemoryClient {
    fn platform(&self) -> Platform {
        self.state.lock().unwrap().pull_request.platform
    }

    async fn fetch_pull_request(&self, _number: u64) -> Result<PullRequestContext, PlatformError> {
        Ok(self.state.lock().unwrap().pull_request.clone())
    }

    async fn add_label(&self, _number: u64, label: &str) -> Result<AddOutcome, PlatformError> {
        self.call("add_label", |state| {
            if state.pull_request.current_labels.insert(label) {
                AddOutcome::Added
            } else {
                AddOutcome::AlreadyPresent
            }
        })
    }

    async fn remove_label(&self, _number: u64, label: &str) -> Result<RemoveOutcome, PlatformError> {
        self.call("remove_label", |state| {
            if state.pull_request.current_labels.remove(label) {
                RemoveOutcome::Removed
            } else {
                RemoveOutcome::AlreadyAbsent
            }
        })
    }

    async fn ensure_repo_label(&self, name: &str, _color: &str) -> Result<CreateOutcome, PlatformError> {
        self.call("ensure_repo_label", |state| {
            if state.repo_labels.insert(name.to_lowercase()) {
                CreateOutcome::Created
            } else {
                CreateOutcome::AlreadyExists
            }
        })
    }

    async fn set_commit_status(&self, sha: &str, status: &CommitStatus) -> Result<(), PlatformError> {
        self.call("set_commit_status", |state| {
            state.statuses.push((sha.to_string(), status.clone()));
        })
    }

    async fn create_comment(&self, _number: u64, body: &str) -> Result<(), PlatformError> {
        self.call("create_comment", |state| state.comments.push(body.to_string()))
    }

    async fn list_comments(&self, _number: u64) -> Result<Vec<String>, PlatformError> {
        Ok(self.state.lock().unwrap().comments.clone())
    }

    async fn find_open_issue(&self, title: &str) -> Result<Option<u64>, PlatformError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .issues
            .iter()
            .find(|issue| issue.open && issue.title == title)
            .map(|issue| issue.number))
    }

    async fn create_issue(&self, title: &str, body: &str, assignee: Option<&str>) -> Result<u64, PlatformError> {
        self.call("create_issue", |state| {
            let number = 1000 + state.issues.len() as u64;
            state.issues.push(MemoryIssue {
                number,
                title: title.to_string(),
                body: body.to_string(),
                assignee: assignee.map(str::to_string),
                open: true,
                comments: Vec::new(),
            });
            number
        })
    }

    async fn close_issue(&self, issue: u64, comment: &str) -> Result<(), PlatformError> {
        self.call("close_issue", |state| {
            if let Some(found) = state.issues.iter_mut().find(|i| i.number == issue) {
                found.comments.push(comment.to_string());
                found.open = false;
            }
        })
    }

    async fn request_reviewers(&self, _number: u64, reviewers: &[String]) -> Result<(), PlatformError> {
        self.call("request_reviewers", |state| {
            state.requested_reviewers.extend(reviewers.iter().cloned())
        })
    }

    async fn add_assignee(&self, _number: u64, assignee: &str) -> Result<(), PlatformError> {
        self.call("add_assignee", |state| state.assignees.push(assignee.to_string()))
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, PlatformError> {
        Ok(self.state.lock().unwrap().branches.contains(branch))
    }

    async fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        _body: &str,
    ) -> Result<String, PlatformError> {
        self.call("create_pull_request", |state| {
            state
                .opened_pull_requests
                .push((head.to_string(), base.to_string(), title.to_string()));
            format!("memory://pulls/{}", state.opened_pull_requests.len())
        })
    }

    fn clone_url(&self) -> String {
        "memory://repo.git".to_string()
    }
}
