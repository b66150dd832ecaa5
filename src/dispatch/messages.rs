use crate::config::{CheckSpec, RepositoryConfig};
use crate::policy::labels::USER_LABELS;
use crate::pr::PullRequestContext;

pub const WELCOME_MARKER: &str = "<!-- pr-reconciler:welcome -->";

pub fn tracking_issue_title(ctx: &PullRequestContext) -> String {
    format!("{} - {}", ctx.title, ctx.number)
}

pub fn tracking_issue_body(ctx: &PullRequestContext) -> String {
    format!(
        "[Auto generated]\n\nTracks #{} by @{} into `{}`.",
        ctx.number, ctx.author, ctx.base_branch
    )
}

pub fn welcome(ctx: &PullRequestContext, settings: &RepositoryConfig) -> String {
    let mut body = format!("{WELCOME_MARKER}\n\nThanks for the pull request, @{}!\n\n", ctx.author);

    body.push_str("**Label commands** (comment on this pull request):\n");
    for label in USER_LABELS {
        body.push_str(&format!("* `!{label}` / `!-{label}` add or remove `{label}`\n"));
    }
    body.push_str("* `!lgtm` / `!-lgtm` approve or withdraw your approval\n");
    body.push_str("* `!cherry-pick <branch> ...` cherry-pick into branches once merged\n\n");

    body.push_str("**Commands:**\n");
    body.push_str("* `/retest <check>` or `/retest all` re-run checks\n");
    body.push_str("* `/assign-reviewers` request the configured reviewers\n");
    body.push_str("* `/check-can-merge` recompute the merge state\n");

    let checks = settings.checks();
    if !checks.is_empty() {
        body.push_str(&format!("\n**Checks:** {}\n", check_names(&checks)));
    }
    body
}

pub fn closed_comment(merged: bool) -> String {
    if merged {
        "Pull request was merged.".to_string()
    } else {
        "Pull request was closed without merging.".to_string()
    }
}

pub fn cherry_pick_not_merged(branches: &[String]) -> String {
    format!(
        "Cherry-pick into {} requested, but this pull request is not merged. \
         Comment `!cherry-pick` again after it is merged.",
        branches
            .iter()
            .map(|b| format!("`{b}`"))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

pub fn unknown_check(name: &str, checks: &[CheckSpec]) -> String {
    if checks.is_empty() {
        format!("No check named `{name}`: this repository has no checks configured.")
    } else {
        format!("No check named `{name}`. Available checks: {}.", check_names(checks))
    }
}

pub fn rejection_marker(check: &str, sha: &str) -> String {
    format!("<!-- pr-reconciler:rejected:{check}:{sha} -->")
}

pub fn command_rejected(check: &CheckSpec, reason: &str, sha: &str) -> String {
    format!(
        "{}\n\nCheck `{}` was not run: its command failed validation.\n\n> {reason}",
        rejection_marker(&check.name, sha),
        check.name
    )
}

pub fn no_reviewers() -> String {
    "No reviewers are configured for this repository.".to_string()
}

fn check_names(checks: &[CheckSpec]) -> String {
    checks
        .iter()
        .map(|c| format!("`{}`", c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pr::tests::test_context;

    #[test]
    fn test_tracking_issue_title() {
        assert_eq!(tracking_issue_title(&test_context()), "Add OAuth2 login flow - 42");
    }

    #[test]
    fn test_welcome_lists_checks() {
        let settings = RepositoryConfig {
            tox: true,
            ..RepositoryConfig::default()
        };
        let body = welcome(&test_context(), &settings);
        assert!(body.starts_with(WELCOME_MARKER));
        assert!(body.contains("`!hold`"));
        assert!(body.contains("**Checks:** `tox`"));
    }

    #[test]
    fn test_unknown_check() {
        let checks = vec![CheckSpec::new("tox", "tox")];
        assert_eq!(
            unknown_check("lint", &checks),
            "No check named `lint`. Available checks: `tox`."
        );
    }
}
