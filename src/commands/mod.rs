//! Comment command grammars.
//!
//! A comment body is read by two independent parsers: `!`-prefixed label and
//! verdict commands ([`label`]) and `/`-prefixed imperative commands
//! ([`imperative`]). Each returns typed commands in the order they appear.

pub mod imperative;
pub mod label;

pub use imperative::{parse_imperative_commands, ImperativeCommand, RetestTarget};
pub use label::{parse_label_commands, LabelCommand};

/// Marker appended to every comment the reconciler posts.
pub const SIGNATURE: &str = "<!-- pr-reconciler -->";

/// Common prefix of [`SIGNATURE`] and the reconciler's other comment markers.
const MARKER_PREFIX: &str = "<!-- pr-reconciler";

/// `body` with [`SIGNATURE`] appended, unless it already carries a marker.
pub fn sign(body: &str) -> String {
    if is_signed(body) {
        body.to_string()
    } else {
        format!("{body}\n\n{SIGNATURE}")
    }
}

/// Whether `body` was posted by the reconciler. Such comments are never
/// read for commands, whatever the configured bot user.
pub fn is_signed(body: &str) -> bool {
    body.contains(MARKER_PREFIX)
}

/// Both command lists found in one comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedComment {
    pub label_commands: Vec<LabelCommand>,
    pub imperative_commands: Vec<ImperativeCommand>,
}

impl ParsedComment {
    pub fn parse(body: &str) -> Self {
        Self {
            label_commands: parse_label_commands(body),
            imperative_commands: parse_imperative_commands(body),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.label_commands.is_empty() && self.imperative_commands.is_empty()
    }

    /// Target branches of every `!cherry-pick` line.
    pub fn cherry_pick_targets(&self) -> Vec<String> {
        self.label_commands
            .iter()
            .filter_map(|command| match command {
                LabelCommand::CherryPick(branches) => Some(branches.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }
}

/// Lines quoted from an earlier comment must not re-trigger commands.
pub(crate) fn command_lines(body: &str) -> impl Iterator<Item = &str> {
    body.lines().filter(|line| !line.trim_start().starts_with('>'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign() {
        let signed = sign("Cherry-pick failed");
        assert!(signed.starts_with("Cherry-pick failed"));
        assert!(is_signed(&signed));
        assert_eq!(sign(&signed), signed);
        assert!(is_signed("<!-- pr-reconciler:welcome -->\n\nThanks"));
        assert!(!is_signed("!verified"));
    }

    #[test]
    fn test_both_grammars_from_one_body() {
        let parsed = ParsedComment::parse("!verified\n/retest tox\n!-hold");
        assert_eq!(
            parsed.label_commands,
            vec![
                LabelCommand::Add("verified".to_string()),
                LabelCommand::Remove("hold".to_string())
            ]
        );
        assert_eq!(
            parsed.imperative_commands,
            vec![ImperativeCommand::Retest(RetestTarget::Check("tox".to_string()))]
        );
    }

    #[test]
    fn test_quoted_lines_are_ignored() {
        let parsed = ParsedComment::parse("> !verified\n> /retest tox\nthanks!");
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_cherry_pick_targets() {
        let parsed = ParsedComment::parse("!cherry-pick v1.0 v1.1\n!cherry-pick v2");
        assert_eq!(parsed.cherry_pick_targets(), vec!["v1.0", "v1.1", "v2"]);
    }
}
