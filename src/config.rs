use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::pr::Platform;

pub const CONFIG_FILE: &str = ".pr-reconciler.toml";

const TOX_CHECK: &str = "tox";
const PRE_COMMIT_CHECK: &str = "pre-commit";
const PRE_COMMIT_COMMAND: &str = "pre-commit run --all-files";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Repository {0} is not configured")]
    RepositoryNotFound(String),

    #[error("No API token for {repository}: set `token` or the {env_var} environment variable")]
    MissingToken {
        repository: String,
        env_var: &'static str,
    },
}

/// Top-level configuration loaded from .pr-reconciler.toml.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Login the bot acts as. Its own comments and label events are ignored.
    #[serde(default)]
    pub bot_user: Option<String>,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    /// Keyed by full repository name (`org/repo` or a GitLab namespace path).
    #[serde(default)]
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub queue_capacity: usize,
    pub command_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 32,
            command_timeout_secs: 1800,
        }
    }
}

/// Per-repository settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub platform: Platform,
    /// API token. If None, falls back to GITHUB_TOKEN / GITLAB_TOKEN.
    pub token: Option<String>,
    /// API root, e.g. `https://gitlab.example.com/api/v4`.
    pub api_url: Option<String>,
    pub tox: bool,
    pub tox_command: Option<String>,
    pub pre_commit: bool,
    pub verified_job: bool,
    pub create_issue_for_new_pr: bool,
    pub approvers: Vec<String>,
    pub reviewers: Vec<String>,
    /// Label prefixes that must be present (and no other tracked ones) to merge.
    pub can_be_merged_required_labels: Option<Vec<String>>,
    pub checks: Vec<CheckSpec>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            platform: Platform::GitHub,
            token: None,
            api_url: None,
            tox: false,
            tox_command: None,
            pre_commit: false,
            verified_job: true,
            create_issue_for_new_pr: true,
            approvers: Vec::new(),
            reviewers: Vec::new(),
            can_be_merged_required_labels: None,
            checks: Vec::new(),
        }
    }
}

/// A named check. The name is also the commit status context.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    pub command: String,
}

impl CheckSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
        }
    }
}

/// Configuration resolved for the repository of one delivery.
#[derive(Debug, Clone)]
pub struct ResolvedRepository {
    pub full_name: String,
    pub settings: RepositoryConfig,
    pub token: String,
}

impl Config {
    /// Load configuration from .pr-reconciler.toml in the current directory.
    /// Returns default config if the file doesn't exist.
    pub fn load() -> Result<Config, ConfigError> {
        let path = Path::new(CONFIG_FILE);
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Settings for `full_name`, matched exactly first and then ignoring case.
    pub fn repository(&self, full_name: &str) -> Result<&RepositoryConfig, ConfigError> {
        self.repositories
            .get(full_name)
            .or_else(|| {
                self.repositories
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(full_name))
                    .map(|(_, repo)| repo)
            })
            .ok_or_else(|| ConfigError::RepositoryNotFound(full_name.to_string()))
    }

    /// Look up a repository and its credentials in one step.
    pub fn resolve(&self, full_name: &str) -> Result<ResolvedRepository, ConfigError> {
        let settings = self.repository(full_name)?;
        let token = settings.token(full_name)?;
        Ok(ResolvedRepository {
            full_name: full_name.to_string(),
            settings: settings.clone(),
            token,
        })
    }
}

impl RepositoryConfig {
    fn token_env_var(&self) -> &'static str {
        match self.platform {
            Platform::GitHub => "GITHUB_TOKEN",
            Platform::GitLab => "GITLAB_TOKEN",
        }
    }

    /// Resolve the API token: config file value takes precedence,
    /// falls back to the platform's token env var.
    pub fn token(&self, full_name: &str) -> Result<String, ConfigError> {
        let env_var = self.token_env_var();
        self.token
            .clone()
            .or_else(|| std::env::var(env_var).ok())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ConfigError::MissingToken {
                repository: full_name.to_string(),
                env_var,
            })
    }

    /// Every enabled check: tox, pre-commit, then custom checks in file order.
    pub fn checks(&self) -> Vec<CheckSpec> {
        let mut checks = Vec::new();
        if self.tox {
            let command = self.tox_command.as_deref().unwrap_or(TOX_CHECK);
            checks.push(CheckSpec::new(TOX_CHECK, command));
        }
        if self.pre_commit {
            checks.push(CheckSpec::new(PRE_COMMIT_CHECK, PRE_COMMIT_COMMAND));
        }
        checks.extend(self.checks.iter().cloned());
        checks
    }

    pub fn check(&self, name: &str) -> Option<CheckSpec> {
        self.checks().into_iter().find(|c| c.name == name)
    }

    /// Prefixes `is_mergeable` compares against.
    pub fn required_merge_labels(&self) -> Vec<String> {
        if let Some(labels) = &self.can_be_merged_required_labels {
            return labels.clone();
        }
        let mut labels = vec!["Approved".to_string()];
        if self.verified_job {
            labels.push("verified".to_string());
        }
        labels
    }

    pub fn is_approver(&self, user: &str) -> bool {
        self.approvers.iter().any(|a| a.eq_ignore_ascii_case(user))
    }

    /// Configured reviewers minus the author.
    pub fn reviewers_for(&self, author: &str) -> Vec<String> {
        self.reviewers
            .iter()
            .filter(|r| !r.eq_ignore_ascii_case(author))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
bot_user = "reconciler-bot"

[transport]
max_attempts = 5

[repositories."org/repo"]
tox = true
tox_command = "tox -e py312"
pre_commit = true
approvers = ["bob"]
reviewers = ["alice", "bob", "carol"]
token = "ghp_test"

[[repositories."org/repo".checks]]
name = "unit"
command = "pytest tests/"

[repositories."group/project"]
platform = "gitlab"
api_url = "https://gitlab.example.com/api/v4"
verified_job = false
can_be_merged_required_labels = ["Approved", "Reviewed"]
"#;

    fn sample() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.bot_user.is_none());
        assert!(config.repositories.is_empty());
        assert_eq!(config.transport.max_attempts, 3);
        assert_eq!(config.worker.queue_capacity, 32);
    }

    #[test]
    fn test_parse_config_toml() {
        let config = sample();
        assert_eq!(config.transport.max_attempts, 5);
        assert_eq!(config.transport.base_delay_ms, 500);
        assert_eq!(config.bot_user.as_deref(), Some("reconciler-bot"));

        let repo = config.repository("org/repo").unwrap();
        assert_eq!(repo.platform, Platform::GitHub);
        assert!(repo.verified_job);
        assert!(repo.create_issue_for_new_pr);

        let gitlab = config.repository("group/project").unwrap();
        assert_eq!(gitlab.platform, Platform::GitLab);
        assert!(!gitlab.verified_job);
    }

    #[test]
    fn test_legacy_keys_still_parse() {
        let config: Config = toml::from_str(
            r#"
            [repositories."org/legacy"]
            platform = "github"
            upload_to_pypi_enabled = true
            "#,
        )
        .unwrap();
        assert!(config.repository("org/legacy").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.repositories.len(), 2);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"repositories = 3").unwrap();
        assert!(matches!(Config::load_from(file.path()), Err(ConfigError::Parse(_))));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(matches!(Config::load_from(&missing), Err(ConfigError::FileRead(_))));
    }

    #[test]
    fn test_repository_lookup() {
        let config = sample();
        assert!(config.repository("ORG/Repo").is_ok());
        assert!(matches!(
            config.repository("org/other"),
            Err(ConfigError::RepositoryNotFound(name)) if name == "org/other"
        ));
    }

    #[test]
    fn test_resolve_uses_configured_token() {
        let resolved = sample().resolve("org/repo").unwrap();
        assert_eq!(resolved.token, "ghp_test");
        assert_eq!(resolved.full_name, "org/repo");
    }

    #[test]
    fn test_checks_order() {
        let config = sample();
        let checks = config.repository("org/repo").unwrap().checks();
        assert_eq!(
            checks,
            vec![
                CheckSpec::new("tox", "tox -e py312"),
                CheckSpec::new("pre-commit", "pre-commit run --all-files"),
                CheckSpec::new("unit", "pytest tests/"),
            ]
        );
        assert!(config.repository("group/project").unwrap().checks().is_empty());
    }

    #[test]
    fn test_required_merge_labels() {
        let config = sample();
        assert_eq!(
            config.repository("org/repo").unwrap().required_merge_labels(),
            vec!["Approved", "verified"]
        );
        assert_eq!(
            config.repository("group/project").unwrap().required_merge_labels(),
            vec!["Approved", "Reviewed"]
        );
        let no_verified = RepositoryConfig {
            verified_job: false,
            ..RepositoryConfig::default()
        };
        assert_eq!(no_verified.required_merge_labels(), vec!["Approved"]);
    }

    #[test]
    fn test_reviewers_exclude_author() {
        let config = sample();
        let repo = config.repository("org/repo").unwrap();
        assert_eq!(repo.reviewers_for("Alice"), vec!["bob", "carol"]);
        assert!(repo.is_approver("BOB"));
        assert!(!repo.is_approver("carol"));
    }
}
