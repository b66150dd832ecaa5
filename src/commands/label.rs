use std::sync::LazyLock;

use regex::Regex;

use super::command_lines;

/// `!<label>` adds, `!-<label>` removes.
static LABEL_COMMAND: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!(-)?(\w+)").unwrap());

/// `!cherry-pick <branch> [<branch> ...]` on its own line.
static CHERRY_PICK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*!cherry-pick\s+(\S.*)$").unwrap());

const LGTM: &str = "lgtm";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelCommand {
    Add(String),
    Remove(String),
    /// `!lgtm`, a synthetic approval from the commenter.
    Lgtm,
    /// `!-lgtm`, withdraws the commenter's approval.
    Unlgtm,
    CherryPick(Vec<String>),
}

/// Parse every `!` command in a comment body, left to right.
///
/// A cherry-pick line is consumed whole; its branch names are never read
/// as label commands.
pub fn parse_label_commands(body: &str) -> Vec<LabelCommand> {
    let mut commands = Vec::new();

    for line in command_lines(body) {
        if let Some(captures) = CHERRY_PICK.captures(line) {
            let branches = captures[1].split_whitespace().map(str::to_string).collect();
            commands.push(LabelCommand::CherryPick(branches));
            continue;
        }

        for captures in LABEL_COMMAND.captures_iter(line) {
            let remove = captures.get(1).is_some();
            let name = &captures[2];
            let command = match (name.eq_ignore_ascii_case(LGTM), remove) {
                (true, false) => LabelCommand::Lgtm,
                (true, true) => LabelCommand::Unlgtm,
                (false, false) => LabelCommand::Add(name.to_string()),
                (false, true) => LabelCommand::Remove(name.to_string()),
            };
            commands.push(command);
        }
    }

    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_remove_in_order() {
        assert_eq!(
            parse_label_commands("!verified !-hold"),
            vec![
                LabelCommand::Add("verified".to_string()),
                LabelCommand::Remove("hold".to_string())
            ]
        );
    }

    #[test]
    fn test_lgtm_variants() {
        assert_eq!(
            parse_label_commands("!LGTM\n!-lgtm"),
            vec![LabelCommand::Lgtm, LabelCommand::Unlgtm]
        );
    }

    #[test]
    fn test_cherry_pick_line() {
        assert_eq!(
            parse_label_commands("!cherry-pick release-1.0 release-2.0"),
            vec![LabelCommand::CherryPick(vec![
                "release-1.0".to_string(),
                "release-2.0".to_string()
            ])]
        );
    }

    #[test]
    fn test_bare_cherry_pick_is_not_a_command() {
        assert_eq!(
            parse_label_commands("!cherry-pick"),
            vec![LabelCommand::Add("cherry".to_string())]
        );
    }

    #[test]
    fn test_plain_text_has_no_commands() {
        assert!(parse_label_commands("Looks good to me! Ship it.").is_empty());
        assert!(parse_label_commands("").is_empty());
    }
}
