use std::sync::LazyLock;

use regex::Regex;

use super::command_lines;

/// `/<command> [args]` at the start of a line.
static IMPERATIVE_COMMAND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*/([a-z][a-z0-9-]*)(?:\s+(.*))?$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetestTarget {
    All,
    Check(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImperativeCommand {
    Retest(RetestTarget),
    AssignReviewers,
    CheckCanMerge,
    Unknown(String),
}

/// Parse every `/` command in a comment body, one per line.
pub fn parse_imperative_commands(body: &str) -> Vec<ImperativeCommand> {
    let mut commands = Vec::new();

    for line in command_lines(body) {
        let Some(captures) = IMPERATIVE_COMMAND.captures(line) else {
            continue;
        };
        let args: Vec<&str> = captures
            .get(2)
            .map(|m| m.as_str().split_whitespace().collect())
            .unwrap_or_default();

        match &captures[1] {
            "retest" if args.is_empty() || args.contains(&"all") => {
                commands.push(ImperativeCommand::Retest(RetestTarget::All));
            }
            "retest" => commands.extend(
                args.iter()
                    .map(|name| ImperativeCommand::Retest(RetestTarget::Check(name.to_string()))),
            ),
            "assign-reviewers" => commands.push(ImperativeCommand::AssignReviewers),
            "check-can-merge" => commands.push(ImperativeCommand::CheckCanMerge),
            other => commands.push(ImperativeCommand::Unknown(other.to_string())),
        }
    }

    commands
}
