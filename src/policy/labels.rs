use std::fmt;

use tracing::warn;

use super::LabelMutation;
use crate::commands::label::{parse_label_commands, LabelCommand};
use crate::pr::LabelSet;

pub const SIZE_LABEL_PREFIX: &str = "size/";
pub const BRANCH_LABEL_PREFIX: &str = "branch-";
pub const TARGET_VERSION_PREFIX: &str = "target-version-";
pub const VERIFIED_LABEL: &str = "verified";
pub const HOLD_LABEL: &str = "hold";
pub const WIP_LABEL: &str = "wip";
pub const CAN_BE_MERGED_LABEL: &str = "can-be-merged";

/// Labels anyone may toggle with `!<label>` / `!-<label>`.
pub const USER_LABELS: &[&str] = &[HOLD_LABEL, VERIFIED_LABEL, WIP_LABEL];

/// Longest label name accepted from a comment command.
pub const MAX_LABEL_LENGTH: usize = 49;

/// Size tier derived from the number of changed lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SizeCategory {
    XS,
    S,
    M,
    L,
    XL,
    XXL,
}

impl SizeCategory {
    pub fn from_total(total: u64) -> Self {
        match total {
            0..=19 => SizeCategory::XS,
            20..=49 => SizeCategory::S,
            50..=99 => SizeCategory::M,
            100..=299 => SizeCategory::L,
            300..=499 => SizeCategory::XL,
            _ => SizeCategory::XXL,
        }
    }

    pub fn label(self) -> String {
        format!("{SIZE_LABEL_PREFIX}{self}")
    }
}

impl fmt::Display for SizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SizeCategory::XS => "XS",
            SizeCategory::S => "S",
            SizeCategory::M => "M",
            SizeCategory::L => "L",
            SizeCategory::XL => "XL",
            SizeCategory::XXL => "XXL",
        };
        write!(f, "{name}")
    }
}

/// Size label for a change, e.g. `size/M`.
pub fn compute_size_label(additions: u64, deletions: u64) -> String {
    SizeCategory::from_total(additions.saturating_add(deletions)).label()
}

/// Mutations that leave exactly one `size/*` label, equal to `new_label`.
pub fn reconcile_size_label(current: &LabelSet, new_label: &str) -> Vec<LabelMutation> {
    reconcile_exclusive(current, SIZE_LABEL_PREFIX, new_label)
}

/// Mutations that leave exactly one `branch-*` label for the base branch.
pub fn reconcile_branch_label(current: &LabelSet, base_branch: &str) -> Vec<LabelMutation> {
    reconcile_exclusive(
        current,
        BRANCH_LABEL_PREFIX,
        &format!("{BRANCH_LABEL_PREFIX}{base_branch}"),
    )
}

/// Keep `wanted` as the only label carrying `prefix`.
///
/// Stale labels are removed before the new one is added, and nothing is
/// emitted when `wanted` is already the sole match.
fn reconcile_exclusive(current: &LabelSet, prefix: &str, wanted: &str) -> Vec<LabelMutation> {
    let mut mutations: Vec<LabelMutation> = current
        .with_prefix(prefix)
        .filter(|existing| !existing.eq_ignore_ascii_case(wanted))
        .map(LabelMutation::remove)
        .collect();

    if !current.contains(wanted) {
        mutations.push(LabelMutation::add(wanted));
    }
    mutations
}

/// Translate a `!<label>` / `!-<label>` command into a mutation.
///
/// Returns `None` for commands that are not plain label toggles, for names
/// outside [`USER_LABELS`], and for names longer than [`MAX_LABEL_LENGTH`].
pub fn user_label_mutation(command: &LabelCommand) -> Option<LabelMutation> {
    let (label, mutation) = match command {
        LabelCommand::Add(label) => (label, LabelMutation::add(label.to_lowercase())),
        LabelCommand::Remove(label) => (label, LabelMutation::remove(label.to_lowercase())),
        LabelCommand::Lgtm | LabelCommand::Unlgtm | LabelCommand::CherryPick(_) => return None,
    };

    if exceeds_label_length(label) {
        warn!(label = %label, max = MAX_LABEL_LENGTH, "dropping label command, name too long");
        return None;
    }

    USER_LABELS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(label))
        .then_some(mutation)
}

/// Whether `name` is longer than [`MAX_LABEL_LENGTH`] characters.
fn exceeds_label_length(name: &str) -> bool {
    name.chars().count() > MAX_LABEL_LENGTH
}

/// Label mutations requested by a comment body, in the order written.
pub fn apply_user_label_command(text: &str) -> Vec<LabelMutation> {
    parse_label_commands(text)
        .iter()
        .filter_map(user_label_mutation)
        .collect()
}

/// Branches named by `target-version-<branch>` labels.
pub fn target_versions(current: &LabelSet) -> Vec<String> {
    current
        .with_prefix(TARGET_VERSION_PREFIX)
        .map(|label| label[TARGET_VERSION_PREFIX.len()..].to_string())
        .filter(|branch| !branch.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::apply_effective;

    #[test]
    fn test_size_thresholds() {
        assert_eq!(compute_size_label(0, 0), "size/XS");
        assert_eq!(compute_size_label(10, 9), "size/XS");
        assert_eq!(compute_size_label(10, 10), "size/S");
        assert_eq!(compute_size_label(49, 0), "size/S");
        assert_eq!(compute_size_label(50, 0), "size/M");
        assert_eq!(compute_size_label(80, 10), "size/M");
        assert_eq!(compute_size_label(100, 0), "size/L");
        assert_eq!(compute_size_label(299, 0), "size/L");
        assert_eq!(compute_size_label(300, 0), "size/XL");
        assert_eq!(compute_size_label(0, 499), "size/XL");
        assert_eq!(compute_size_label(250, 250), "size/XXL");
        assert_eq!(compute_size_label(u64::MAX, u64::MAX), "size/XXL");
    }

    #[test]
    fn test_size_is_monotonic() {
        let mut previous = SizeCategory::from_total(0);
        for total in 0..1000 {
            let category = SizeCategory::from_total(total);
            assert!(category >= previous, "size decreased at {total}");
            previous = category;
        }
    }

    #[test]
    fn test_reconcile_adds_when_missing() {
        let labels = LabelSet::new();
        assert_eq!(
            reconcile_size_label(&labels, "size/M"),
            vec![LabelMutation::add("size/M")]
        );
    }

    #[test]
    fn test_reconcile_replaces_stale_size() {
        let labels: LabelSet = [compute_size_label(80, 10)].into_iter().collect();
        assert!(labels.contains("size/M"));

        let new_label = compute_size_label(40, 250);
        assert_eq!(
            reconcile_size_label(&labels, &new_label),
            vec![LabelMutation::remove("size/M"), LabelMutation::add("size/L")]
        );
    }

    #[test]
    fn test_reconcile_is_case_insensitive_noop() {
        let labels: LabelSet = ["SIZE/m"].into_iter().collect();
        assert!(reconcile_size_label(&labels, "size/M").is_empty());
    }

    #[test]
    fn test_reconcile_converges() {
        let mut labels: LabelSet = ["size/XS", "hold"].into_iter().collect();
        let first = reconcile_size_label(&labels, "size/L");
        apply_effective(&mut labels, first);
        assert!(reconcile_size_label(&labels, "size/L").is_empty());
        assert_eq!(labels.with_prefix(SIZE_LABEL_PREFIX).count(), 1);
    }

    #[test]
    fn test_reconcile_branch_label() {
        let labels: LabelSet = ["branch-main"].into_iter().collect();
        assert!(reconcile_branch_label(&labels, "main").is_empty());
        assert_eq!(
            reconcile_branch_label(&labels, "release-1.0"),
            vec![
                LabelMutation::remove("branch-main"),
                LabelMutation::add("branch-release-1.0")
            ]
        );
    }

    #[test]
    fn test_user_label_commands_in_order() {
        assert_eq!(
            apply_user_label_command("!verified !-hold"),
            vec![LabelMutation::add("verified"), LabelMutation::remove("hold")]
        );
    }

    #[test]
    fn test_unknown_labels_are_ignored() {
        assert!(apply_user_label_command("!bug !-documentation").is_empty());
        assert_eq!(
            apply_user_label_command("!bug\n!WIP"),
            vec![LabelMutation::add("wip")]
        );
    }

    #[test]
    fn test_overlong_labels_are_dropped() {
        let long = format!("!{}", "a".repeat(MAX_LABEL_LENGTH + 1));
        assert!(apply_user_label_command(&long).is_empty());
    }

    #[test]
    fn test_label_length_counts_characters() {
        assert!(!exceeds_label_length(&"é".repeat(MAX_LABEL_LENGTH)));
        assert!(exceeds_label_length(&"é".repeat(MAX_LABEL_LENGTH + 1)));
        assert!(!exceeds_label_length(&"a".repeat(MAX_LABEL_LENGTH)));
    }

    #[test]
    fn test_lgtm_is_not_a_label_command() {
        assert!(apply_user_label_command("!lgtm").is_empty());
    }

    #[test]
    fn test_target_versions() {
        let labels: LabelSet = ["target-version-v1.2", "Target-Version-v2", "hold"]
            .into_iter()
            .collect();
        let mut targets = target_versions(&labels);
        targets.sort();
        assert_eq!(targets, vec!["v1.2".to_string(), "v2".to_string()]);
    }
}
