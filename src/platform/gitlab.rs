use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use super::transport::{Auth, HttpTransport};
use super::{web_root, with_credentials, AddOutcome, CommitStatus, CreateOutcome, PlatformClient, PlatformError, RemoveOutcome};
use crate::config::TransportConfig;
use crate::pr::diff::count_files;
use crate::pr::{LabelSet, MergeState, Platform, PullRequestContext, ReviewVerdict};

pub const DEFAULT_API_URL: &str = "https://gitlab.com/api/v4";

/// GitLab REST v4 client for one project.
#[derive(Clone)]
pub struct GitLabClient {
    transport: HttpTransport,
    full_name: String,
    project: String,
    token: String,
}

#[derive(Deserialize)]
struct User {
    username: String,
}

#[derive(Deserialize)]
struct UserId {
    id: u64,
}

#[derive(Deserialize)]
struct MergeRequestResponse {
    iid: u64,
    title: String,
    author: User,
    state: String,
    target_branch: String,
    sha: String,
    merge_commit_sha: Option<String>,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Deserialize)]
struct DiffResponse {
    diff: String,
}

#[derive(Deserialize)]
struct ApprovalsResponse {
    #[serde(default)]
    approved_by: Vec<Approval>,
}

#[derive(Deserialize)]
struct Approval {
    user: User,
}

#[derive(Deserialize)]
struct NoteResponse {
    body: String,
    #[serde(default)]
    system: bool,
}

#[derive(Deserialize)]
struct IssueResponse {
    iid: u64,
    title: String,
}

#[derive(Deserialize)]
struct CreatedMergeRequest {
    web_url: String,
}

impl GitLabClient {
    pub fn new(
        full_name: &str,
        token: &str,
        api_url: Option<&str>,
        transport: &TransportConfig,
    ) -> Result<Self, PlatformError> {
        let api_url = api_url.unwrap_or(DEFAULT_API_URL);
        Ok(Self {
            transport: HttpTransport::new(api_url, Auth::PrivateToken(token.to_string()), transport)?,
            full_name: full_name.to_string(),
            project: urlencoding::encode(full_name).into_owned(),
            token: token.to_string(),
        })
    }

    fn project_path(&self, rest: &str) -> String {
        format!("/projects/{}{rest}", self.project)
    }

    async fn user_id(&self, username: &str) -> Result<u64, PlatformError> {
        let users: Vec<UserId> = self
            .transport
            .get(&format!("/users?username={}", urlencoding::encode(username)))
            .await?
            .error_for_status()?
            .json()?;
        users
            .first()
            .map(|user| user.id)
            .ok_or_else(|| PlatformError::UnknownUser(username.to_string()))
    }

    async fn user_ids(&self, usernames: &[String]) -> Result<Vec<u64>, PlatformError> {
        let mut ids = Vec::with_capacity(usernames.len());
        for username in usernames {
            ids.push(self.user_id(username).await?);
        }
        Ok(ids)
    }

    async fn update_merge_request(&self, number: u64, body: serde_json::Value) -> Result<(), PlatformError> {
        self.transport
            .put(&self.project_path(&format!("/merge_requests/{number}")), &body)
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl PlatformClient for GitLabClient {
    fn platform(&self) -> Platform {
        Platform::GitLab
    }

    #[instrument(skip(self), fields(repository = %self.full_name))]
    async fn fetch_pull_request(&self, number: u64) -> Result<PullRequestContext, PlatformError> {
        let merge_request: MergeRequestResponse = self
            .transport
            .get(&self.project_path(&format!("/merge_requests/{number}")))
            .await?
            .error_for_status()?
            .json()?;
        let diffs: Vec<DiffResponse> = self
            .transport
            .get_all(&self.project_path(&format!("/merge_requests/{number}/diffs?per_page=100")))
            .await?;
        let approvals: ApprovalsResponse = self
            .transport
            .get(&self.project_path(&format!("/merge_requests/{number}/approvals")))
            .await?
            .error_for_status()?
            .json()?;
        debug!(
            title = %merge_request.title,
            files = diffs.len(),
            approvals = approvals.approved_by.len(),
            "fetched merge request"
        );

        let merge_state = match merge_request.state.as_str() {
            "merged" => MergeState::Merged,
            "closed" => MergeState::Closed,
            _ => MergeState::Open,
        };
        let review_states: BTreeMap<String, ReviewVerdict> = approvals
            .approved_by
            .into_iter()
            .map(|approval| (approval.user.username, ReviewVerdict::Approved))
            .collect();

        Ok(PullRequestContext {
            platform: Platform::GitLab,
            repository_full_name: self.full_name.clone(),
            number: merge_request.iid,
            title: merge_request.title,
            author: merge_request.author.username,
            base_branch: merge_request.target_branch,
            head_sha: merge_request.sha,
            merge_commit_sha: merge_request.merge_commit_sha,
            current_labels: merge_request.labels.iter().collect::<LabelSet>(),
            size_metrics: count_files(diffs.iter().map(|d| d.diff.as_str())),
            review_states,
            merge_state,
        })
    }

    /// GitLab's label update is a set operation, so prior state is unknown.
    async fn add_label(&self, number: u64, label: &str) -> Result<AddOutcome, PlatformError> {
        self.update_merge_request(number, json!({ "add_labels": label })).await?;
        Ok(AddOutcome::Added)
    }

    async fn remove_label(&self, number: u64, label: &str) -> Result<RemoveOutcome, PlatformError> {
        self.update_merge_request(number, json!({ "remove_labels": label })).await?;
        Ok(RemoveOutcome::Removed)
    }

    async fn ensure_repo_label(&self, name: &str, color: &str) -> Result<CreateOutcome, PlatformError> {
        let response = self
            .transport
            .post(
                &self.project_path("/labels"),
                &json!({ "name": name, "color": format!("#{color}") }),
            )
            .await?;
        if response.status == StatusCode::CONFLICT {
            return Ok(CreateOutcome::AlreadyExists);
        }
        response.error_for_status()?;
        Ok(CreateOutcome::Created)
    }

    async fn set_commit_status(&self, sha: &str, status: &CommitStatus) -> Result<(), PlatformError> {
        let response = self
            .transport
            .post(
                &self.project_path(&format!("/statuses/{sha}")),
                &json!({
                    "state": status.state.as_gitlab(),
                    "name": status.context,
                    "description": status.description,
                }),
            )
            .await?;
        // Re-posting the state a pipeline job already has is rejected.
        if response.status == StatusCode::BAD_REQUEST && response.body.contains("Cannot transition status") {
            debug!(context = %status.context, state = %status.state, "status already in requested state");
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }

    async fn create_comment(&self, number: u64, body: &str) -> Result<(), PlatformError> {
        self.transport
            .post(
                &self.project_path(&format!("/merge_requests/{number}/notes")),
                &json!({ "body": body }),
            )
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn list_comments(&self, number: u64) -> Result<Vec<String>, PlatformError> {
        let notes: Vec<NoteResponse> = self
            .transport
            .get_all(&self.project_path(&format!(
                "/merge_requests/{number}/notes?sort=asc&order_by=created_at&per_page=100"
            )))
            .await?;
        Ok(notes.into_iter().filter(|n| !n.system).map(|n| n.body).collect())
    }

    async fn find_open_issue(&self, title: &str) -> Result<Option<u64>, PlatformError> {
        let issues: Vec<IssueResponse> = self
            .transport
            .get_all(&self.project_path(&format!(
                "/issues?state=opened&in=title&search={}&per_page=100",
                urlencoding::encode(title)
            )))
            .await?;
        Ok(issues.into_iter().find(|issue| issue.title == title).map(|issue| issue.iid))
    }

    async fn create_issue(&self, title: &str, body: &str, assignee: Option<&str>) -> Result<u64, PlatformError> {
        let assignee_ids = match assignee {
            Some(username) => vec![self.user_id(username).await?],
            None => Vec::new(),
        };
        let issue: IssueResponse = self
            .transport
            .post(
                &self.project_path("/issues"),
                &json!({ "title": title, "description": body, "assignee_ids": assignee_ids }),
            )
            .await?
            .error_for_status()?
            .json()?;
        Ok(issue.iid)
    }

    async fn close_issue(&self, issue: u64, comment: &str) -> Result<(), PlatformError> {
        self.transport
            .post(
                &self.project_path(&format!("/issues/{issue}/notes")),
                &json!({ "body": comment }),
            )
            .await?
            .error_for_status()?;
        self.transport
            .put(
                &self.project_path(&format!("/issues/{issue}")),
                &json!({ "state_event": "close" }),
            )
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn request_reviewers(&self, number: u64, reviewers: &[String]) -> Result<(), PlatformError> {
        let reviewer_ids = self.user_ids(reviewers).await?;
        self.update_merge_request(number, json!({ "reviewer_ids": reviewer_ids })).await
    }

    async fn add_assignee(&self, number: u64, assignee: &str) -> Result<(), PlatformError> {
        let id = self.user_id(assignee).await?;
        self.update_merge_request(number, json!({ "assignee_ids": [id] })).await
    }

    async fn branch_exists(&self, branch: &str) -> Result<bool, PlatformError> {
        let path = self.project_path(&format!("/repository/branches/{}", urlencoding::encode(branch)));
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
        let created: CreatedMergeRequest = self
            .transport
            .post(
                &self.project_path("/merge_requests"),
                &json!({
                    "source_branch": head,
                    "target_branch": base,
                    "title": title,
                    "description": body,
                }),
            )
            .await?
            .error_for_status()?
            .json()?;
        Ok(created.web_url)
    }

    fn clone_url(&self) -> String {
        let url = format!("{}/{}.git", web_root(self.transport.base_url()), self.full_name);
        with_credentials(&url, "oauth2", &self.token)
    }
}
