use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;

use crate::policy::{LabelAction, LabelMutation};

/// Hosting platform a repository lives on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    GitHub,
    GitLab,
}

impl Platform {
    /// Ref that holds the head commit of a pull/merge request.
    pub fn head_ref(self, number: u64) -> String {
        match self {
            Platform::GitHub => format!("pull/{number}/head"),
            Platform::GitLab => format!("merge-requests/{number}/head"),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::GitHub => write!(f, "github"),
            Platform::GitLab => write!(f, "gitlab"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    Open,
    Merged,
    Closed,
}

/// Last verdict a reviewer left on a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
    Commented,
}

impl ReviewVerdict {
    /// Parse a review state as GitHub reports it (`approved`, `CHANGES_REQUESTED`, ...).
    pub fn parse(state: &str) -> Option<Self> {
        match state.to_ascii_lowercase().as_str() {
            "approved" => Some(ReviewVerdict::Approved),
            "changes_requested" => Some(ReviewVerdict::ChangesRequested),
            "commented" => Some(ReviewVerdict::Commented),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewVerdict::Approved => write!(f, "approved"),
            ReviewVerdict::ChangesRequested => write!(f, "changes_requested"),
            ReviewVerdict::Commented => write!(f, "commented"),
        }
    }
}

/// Lines added and removed by a pull request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeMetrics {
    pub additions: u64,
    pub deletions: u64,
}

impl SizeMetrics {
    pub fn total(&self) -> u64 {
        self.additions.saturating_add(self.deletions)
    }
}

/// Set of labels where identity is the lowercase name.
///
/// The spelling of the first insertion is kept for display and API calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: BTreeMap<String, String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains_key(&label.to_lowercase())
    }

    /// Returns true when the label was not already present.
    pub fn insert(&mut self, label: &str) -> bool {
        let key = label.to_lowercase();
        if self.labels.contains_key(&key) {
            return false;
        }
        self.labels.insert(key, label.to_string());
        true
    }

    /// Returns true when the label was present.
    pub fn remove(&mut self, label: &str) -> bool {
        self.labels.remove(&label.to_lowercase()).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.values().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels starting with `prefix`, compared case-insensitively.
    pub fn with_prefix<'a>(&'a self, prefix: &str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = prefix.to_lowercase();
        self.labels
            .iter()
            .filter(move |(key, _)| key.starts_with(&prefix))
            .map(|(_, label)| label.as_str())
    }

    /// Apply a mutation, returning whether it changed the set.
    pub fn apply(&mut self, mutation: &LabelMutation) -> bool {
        match mutation.action {
            LabelAction::Add => self.insert(&mutation.label),
            LabelAction::Remove => self.remove(&mutation.label),
        }
    }
}

impl<S: AsRef<str>> FromIterator<S> for LabelSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = LabelSet::new();
        for label in iter {
            set.insert(label.as_ref());
        }
        set
    }
}

/// Snapshot of a pull request, fetched fresh for every delivery.
#[derive(Debug, Clone)]
pub struct PullRequestContext {
    pub platform: Platform,
    pub repository_full_name: String,
    pub number: u64,
    pub title: String,
    pub author: String,
    pub base_branch: String,
    pub head_sha: String,
    /// Commit that landed on the base branch, known once merged.
    pub merge_commit_sha: Option<String>,
    pub current_labels: LabelSet,
    pub size_metrics: SizeMetrics,
    pub review_states: BTreeMap<String, ReviewVerdict>,
    pub merge_state: MergeState,
}

impl PullRequestContext {
    pub fn is_merged(&self) -> bool {
        self.merge_state == MergeState::Merged
    }
}
