use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::transport::{Auth, HttpTransport};
use super::{web_root, with_credentials, AddOutcome, CommitStatus, CreateOutcome, PlatformClient, PlatformError, RemoveOutcome};
use crate::config::TransportConfig;
use crate::pr::{LabelSet, MergeState, Platform, PullRequestContext, ReviewVerdict, SizeMetrics};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// GitHub REST v3 client for one repository.
#[derive(Clone)]
pub struct GitHubClient {
    transport: HttpTransport,
    full_name: String,
    token: String,
}

#[derive(Deserialize)]
struct User {
    login: String,
}

#[derive(Deserialize)]
struct Label {
    name: String,
}

#[derive(Deserialize)]
struct BranchRef {
    #[serde(rename = "ref")]
    name: String,
    sha: String,
}

#[derive(Deserialize)]
struct PullResponse {
    number: u64,
    title: String,
    user: User,
    state: String,
    #[serde(default)]
    merged: bool,
    merge_commit_sha: Option<String>,
    base: BranchRef,
    head: BranchRef,
    #[serde(default)]
    labels: Vec<Label>,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
}

#[derive(Deserialize)]
struct ReviewResponse {
    user: Option<User>,
    state: String,
}

#[derive(Deserialize)]
struct CommentResponse {
    body: Option<String>,
}

#[derive(Deserialize)]
struct IssueResponse {
    number: u64,
    title: String,
    pull_request: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct CreatedPull {
    html_url: String,
}

impl GitHubClient {
    pub fn new(
        full_name: &str,
        token: &str,
        api_url: Option<&str>,
        transport: &TransportConfig,
    ) -> Result<Self, PlatformError> {
        let api_url = api_url.unwrap_or(DEFAULT_API_URL);
        Ok(Self {
            transport: HttpTransport::new(api_url, Auth::Bearer(token.to_string()), transport)?,
            full_name: full_name.to_string(),
            token: token.to_string(),
        })
    }

    fn repo_path(&self, rest: &str) -> String {
        format!("/repos/{}{rest}", self.full_name)
    }

    /// Latest verdict per reviewer; a dismissed review clears the entry.
    fn review_states(reviews: Vec<ReviewResponse>) -> BTreeMap<String, ReviewVerdict> {
        let mut states = BTreeMap::new();
        for review in reviews {
            let Some(user) = review.user else { continue };
            match ReviewVerdict::parse(&review.state) {
                Some(verdict) => {
                    states.insert(user.login, verdict);
                }
                None if review.state.eq_ignore_ascii_case("dismissed") => {
                    states.remove(&user.login);
                }
                None => {}
            }
        }
        states
    }
}

#[async_trait]
impl PlatformClient for GitHubClient {
    fn platform(&self) -> Platform {
        Platform::GitHub
    }

    #[instrument(skip(self), fields(repository = %self.full_name))]
    async fn fetch_pull_request(&self, number: u64) -> Result<PullRequestContext, PlatformError> {
        let pull: PullResponse = self
            .transport
            .get(&self.repo_path(&format!("/pulls/{number}")))
            .await?
            .error_for_status()?
            .json()?;
        let reviews: Vec<ReviewResponse> = self
            .transport
            .get_all(&self.repo_path(&format!("/pulls/{number}/reviews?per_page=100")))
            .await?;
        debug!(title = %pull.title, labels = pull.labels.len(), reviews = reviews.len(), "fetched pull request");

        let merge_state = match (pull.merged, pull.state.as_str()) {
            (true, _) => MergeState::Merged,
            (false, "closed") => MergeState::Closed,
            _ => MergeState::Open,
        };

        Ok(PullRequestContext {
            platform: Platform::GitHub,
            repository_full_name: self.full_name.clone(),
            number: pull.number,
            title: pull.title,
            author: pull.user.login,
            base_branch: pull.base.name,
            head_sha: pull.head.sha,
            merge_commit_sha: pull.merge_commit_sha,
            current_labels: pull.labels.iter().map(|l| l.name.as_str()).collect::<LabelSet>(),
            size_metrics: SizeMetrics {
                additions: pull.additions,
                deletions: pull.deletions,
            },
            review_states: Self::review_states(reviews),
            merge_state,
        })
    }

    async fn add_label(&self, number: u64, label: &str) -> Result<AddOutcome, PlatformError> {
        self.transport
            .post(
                &self.repo_path(&format!("/issues/{number}/labels")),
                &json!({ "labels": [label] }),
            )
            .await?
            .error_for_status()?;
        Ok(AddOutcome::Added)
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<RemoveOutcome, PlatformError> {
        let path = self.repo_path(&format!("/issues/{number}/labels/{}", urlencoding::encode(label)));
        let response = self.transport.delete(&path).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(RemoveOutcome::AlreadyAbsent);
        }
        response.error_for_status()?;
        Ok(RemoveOutcome::Removed)
    }

    async fn ensure_repo_label(&self, name: &str, color: &str) -> Result<CreateOutcome, PlatformError> {
        let response = self
            .transport
            .post(&self.repo_path("/labels"), &json!({ "name": name, "color": color }))
            .await?;
        if response.status == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(CreateOutcome::AlreadyExists);
        }
        response.error_for_status()?;
        Ok(CreateOutcome::Created)
    }

    async fn set_commit_status(&self, sha: &str, status: &CommitStatus) -> Result<(), PlatformError> {
        self.transport
            .post(
                &self.repo_path(&format!("/statuses/{sha}")),
                &json!({
                    "state": status.state.as_github(),
                    "description": status.description,
                    "context": status.context,
                }),
            )
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<(), PlatformError> {
        self.transport
            .post(
                &self.repo_path(&format!("/issues/{number}/comments")),
                &json!({ "body": body }),
            )
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<String>, PlatformError> {
        let comments: Vec<CommentResponse> = self
            .transport
            .get_all(&self.repo_path(&format!("/issues/{number}/comments?per_page=100")))
            .await?;
        Ok(comments.into_iter().filter_map(|c| c.body).collect())
    }

    async fn find_open_issue(&self, title: &str) -> Result<Option<u64>, PlatformError> {
        let issues: Vec<IssueResponse> = self
            .transport
            .get_all(&self.repo_path("/issues?state=open&per_page=100"))
            .await?;
        Ok(issues
            .into_iter()
            .find(|issue| issue.pull_request.is_none() && issue.title == title)
            .map(|issue| issue.number))
    }

    async fn create_issue(&self, title: &str, body: &str, assignee: Option<&str>) -> Result<u64, PlatformError> {
        let assignees: Vec<&str> = assignee.into_iter().collect();
        let issue: IssueResponse = self
            .transport
            .post(
                &self.repo_path("/issues"),
                &json!({ "title": title, "body": body, "assignees": assignees }),
            )
            .await?
            .error_for_status()?
            .json()?;
        Ok(issue.number)
    }

    async fn close_issue(&self, issue: u64, comment: &str) -> Result<(), PlatformError> {
        self.create_comment(issue, comment).await?;
        self.transport
            .patch(&self.repo_path(&format!("/issues/{issue}")), &json!({ "state": "closed" }))
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> Result<(), PlatformError> {
        self.transport
            .post(
                &self.repo_path(&format!("/pulls/{number}/requested_reviewers")),
                &json!({ "reviewers": reviewers }),
            )
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn add_assignee(&self, number: u64, assignee: &str) -> Result<(), PlatformError> {
        self.transport
            .post(
                &self.repo_path(&format!("/issues/{number}/assignees")),
                &json!({ "assignees": [assignee] }),
            )
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, PlatformError> {
        let path = self.repo_path(&format!("/branches/{}", urlencoding::encode(branch)));
        let response = self.transport.get(&path).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        response.error_for_status()?;
        Ok(true)
    }

    async fn create_pull_request(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String, PlatformError> {
        let created: CreatedPull = self
            .transport
            .post(
                &self.repo_path("/pulls"),
                &json!({ "title": title, "head": head, "base": base, "body": body }),
            )
            .await?
            .error_for_status()?
            .json()?;
        Ok(created.html_url)
    }

    fn clone_url(&self) -> String {
        let url = format!("{}/{}.git", web_root(self.transport.base_url()), self.full_name);
        with_credentials(&url, "x-access-token", &self.token)
    }
}
