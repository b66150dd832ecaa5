use std::collections::BTreeSet;

use super::labels::VERIFIED_LABEL;
use super::LabelMutation;
use crate::pr::{LabelSet, ReviewVerdict};

/// Per-reviewer state label families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewLabel {
    Approved,
    Reviewed,
    ChangesRequested,
    Commented,
}

impl ReviewLabel {
    const ALL: [ReviewLabel; 4] = [
        ReviewLabel::Approved,
        ReviewLabel::Reviewed,
        ReviewLabel::ChangesRequested,
        ReviewLabel::Commented,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            ReviewLabel::Approved => "Approved-By-",
            ReviewLabel::Reviewed => "Reviewed-By-",
            ReviewLabel::ChangesRequested => "ChangesRequestedBy-",
            ReviewLabel::Commented => "Commented-By-",
        }
    }

    /// Name used when comparing against required merge prefixes.
    pub fn merge_key(self) -> &'static str {
        match self {
            ReviewLabel::Approved => "Approved",
            ReviewLabel::Reviewed => "Reviewed",
            ReviewLabel::ChangesRequested => "ChangesRequested",
            ReviewLabel::Commented => "Commented",
        }
    }

    pub fn label_for(self, reviewer: &str) -> String {
        format!("{}{reviewer}", self.prefix())
    }

    /// Split a label into its family and the reviewer it belongs to.
    pub fn parse(label: &str) -> Option<(ReviewLabel, &str)> {
        Self::ALL.into_iter().find_map(|kind| {
            let prefix = kind.prefix();
            let head = label.get(..prefix.len())?;
            if !head.eq_ignore_ascii_case(prefix) {
                return None;
            }
            let reviewer = &label[prefix.len()..];
            (!reviewer.is_empty()).then_some((kind, reviewer))
        })
    }
}

/// Tracks review verdicts as labels for one pull request.
#[derive(Debug, Clone, Copy)]
pub struct ReviewTracker<'a> {
    author: &'a str,
    approvers: &'a [String],
}

impl<'a> ReviewTracker<'a> {
    pub fn new(author: &'a str, approvers: &'a [String]) -> Self {
        Self { author, approvers }
    }

    fn is_author(&self, user: &str) -> bool {
        user.eq_ignore_ascii_case(self.author)
    }

    fn is_approver(&self, user: &str) -> bool {
        self.approvers.iter().any(|a| a.eq_ignore_ascii_case(user))
    }

    /// Mutations recording `verdict` from `reviewer`.
    ///
    /// The reviewer ends up with exactly one review label. Reviews by the
    /// author are not tracked.
    pub fn record_review(&self, current: &LabelSet, reviewer: &str, verdict: ReviewVerdict) -> Vec<LabelMutation> {
        if self.is_author(reviewer) {
            return Vec::new();
        }

        let kind = match verdict {
            ReviewVerdict::Approved if self.is_approver(reviewer) => ReviewLabel::Approved,
            ReviewVerdict::Approved => ReviewLabel::Reviewed,
            ReviewVerdict::ChangesRequested => ReviewLabel::ChangesRequested,
            ReviewVerdict::Commented => ReviewLabel::Commented,
        };
        let wanted = kind.label_for(reviewer);

        let mut mutations: Vec<LabelMutation> = labels_of(current, reviewer)
            .filter(|(existing_kind, _)| *existing_kind != kind)
            .map(|(_, label)| LabelMutation::remove(label))
            .collect();

        if !current.contains(&wanted) {
            mutations.push(LabelMutation::add(wanted));
        }
        mutations
    }

    /// Mutations revoking an approval (`!-lgtm`, GitLab unapprove).
    pub fn withdraw_approval(&self, current: &LabelSet, reviewer: &str) -> Vec<LabelMutation> {
        if self.is_author(reviewer) {
            return Vec::new();
        }
        labels_of(current, reviewer)
            .filter(|(kind, _)| matches!(kind, ReviewLabel::Approved | ReviewLabel::Reviewed))
            .map(|(_, label)| LabelMutation::remove(label))
            .collect()
    }
}

fn labels_of<'l>(current: &'l LabelSet, reviewer: &'l str) -> impl Iterator<Item = (ReviewLabel, &'l str)> + 'l {
    current.iter().filter_map(move |label| {
        let (kind, user) = ReviewLabel::parse(label)?;
        user.eq_ignore_ascii_case(reviewer).then_some((kind, label))
    })
}

/// Merge-relevant prefix a label contributes, if any.
pub fn merge_key(label: &str) -> Option<&'static str> {
    if label.eq_ignore_ascii_case(VERIFIED_LABEL) {
        return Some("verified");
    }
    ReviewLabel::parse(label).map(|(kind, _)| kind.merge_key())
}

/// Whether the labels satisfy the required merge prefixes.
///
/// The prefixes observed on the pull request must equal the required set:
/// a missing prefix blocks, and so does an extra tracked one (for example a
/// `Reviewed-By-` label when only `Approved` is required, or any
/// `ChangesRequestedBy-` label). `Commented-By-` labels are only tracked
/// when a required prefix names them.
pub fn is_mergeable(current: &LabelSet, required: &[String]) -> bool {
    let required: BTreeSet<String> = required.iter().map(|p| p.to_lowercase()).collect();
    let tracked = |key: &str| key != "commented" || required.contains(key);

    let observed: BTreeSet<String> = current
        .iter()
        .filter_map(merge_key)
        .map(str::to_lowercase)
        .filter(|key| tracked(key.as_str()))
        .collect();

    observed == required
}

/// Mutations that drop `verified` and every review label after new commits.
pub fn reset_on_new_commit(current: &LabelSet) -> Vec<LabelMutation> {
    current
        .iter()
        .filter(|label| label.eq_ignore_ascii_case(VERIFIED_LABEL) || ReviewLabel::parse(label).is_some())
        .map(LabelMutation::remove)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::apply_effective;

    fn approvers() -> Vec<String> {
        vec!["bob".to_string()]
    }

    fn required(prefixes: &[&str]) -> Vec<String> {
        prefixes.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_parse_review_label() {
        assert_eq!(
            ReviewLabel::parse("Approved-By-bob"),
            Some((ReviewLabel::Approved, "bob"))
        );
        assert_eq!(
            ReviewLabel::parse("changesrequestedby-bob-smith"),
            Some((ReviewLabel::ChangesRequested, "bob-smith"))
        );
        assert_eq!(ReviewLabel::parse("Approved-By-"), None);
        assert_eq!(ReviewLabel::parse("size/M"), None);
    }

    #[test]
    fn test_approver_then_changes_requested() {
        let approvers = approvers();
        let tracker = ReviewTracker::new("alice", &approvers);
        let mut labels = LabelSet::new();

        let first = tracker.record_review(&labels, "bob", ReviewVerdict::Approved);
        assert_eq!(first, vec![LabelMutation::add("Approved-By-bob")]);
        apply_effective(&mut labels, first);

        let second = tracker.record_review(&labels, "bob", ReviewVerdict::ChangesRequested);
        assert_eq!(
            second,
            vec![
                LabelMutation::remove("Approved-By-bob"),
                LabelMutation::add("ChangesRequestedBy-bob")
            ]
        );
    }

    #[test]
    fn test_non_approver_gets_reviewed_label() {
        let approvers = approvers();
        let tracker = ReviewTracker::new("alice", &approvers);
        let mutations = tracker.record_review(&LabelSet::new(), "carol", ReviewVerdict::Approved);
        assert_eq!(mutations, vec![LabelMutation::add("Reviewed-By-carol")]);
    }

    #[test]
    fn test_self_review_is_ignored() {
        let approvers = vec!["alice".to_string()];
        let tracker = ReviewTracker::new("alice", &approvers);
        for verdict in [
            ReviewVerdict::Approved,
            ReviewVerdict::ChangesRequested,
            ReviewVerdict::Commented,
        ] {
            assert!(tracker.record_review(&LabelSet::new(), "Alice", verdict).is_empty());
        }
        assert!(tracker.withdraw_approval(&LabelSet::new(), "alice").is_empty());
    }

    #[test]
    fn test_repeated_review_is_noop() {
        let approvers = approvers();
        let tracker = ReviewTracker::new("alice", &approvers);
        let labels: LabelSet = ["Approved-By-bob"].into_iter().collect();
        assert!(tracker.record_review(&labels, "bob", ReviewVerdict::Approved).is_empty());
    }

    #[test]
    fn test_other_reviewers_untouched() {
        let approvers = approvers();
        let tracker = ReviewTracker::new("alice", &approvers);
        let labels: LabelSet = ["Approved-By-carol", "Commented-By-bob"].into_iter().collect();
        assert_eq!(
            tracker.record_review(&labels, "bob", ReviewVerdict::Approved),
            vec![
                LabelMutation::remove("Commented-By-bob"),
                LabelMutation::add("Approved-By-bob")
            ]
        );
    }

    #[test]
    fn test_withdraw_approval() {
        let approvers = approvers();
        let tracker = ReviewTracker::new("alice", &approvers);
        let labels: LabelSet = ["Approved-By-bob", "Reviewed-By-carol"].into_iter().collect();
        assert_eq!(
            tracker.withdraw_approval(&labels, "bob"),
            vec![LabelMutation::remove("Approved-By-bob")]
        );
        assert!(tracker.withdraw_approval(&labels, "dave").is_empty());
    }

    #[test]
    fn test_is_mergeable_exact_set() {
        let req = required(&["Approved", "verified"]);
        let ready: LabelSet = ["Approved-By-alice", "verified", "size/M"].into_iter().collect();
        assert!(is_mergeable(&ready, &req));

        let missing: LabelSet = ["Approved-By-alice"].into_iter().collect();
        assert!(!is_mergeable(&missing, &req));

        let extra: LabelSet = ["Approved-By-alice", "Reviewed-By-bob", "verified"]
            .into_iter()
            .collect();
        assert!(!is_mergeable(&extra, &req));

        let blocked: LabelSet = ["Approved-By-alice", "ChangesRequestedBy-bob", "verified"]
            .into_iter()
            .collect();
        assert!(!is_mergeable(&blocked, &req));
    }

    #[test]
    fn test_is_mergeable_ignores_comments_unless_required() {
        let req = required(&["Approved"]);
        let labels: LabelSet = ["Approved-By-bob", "Commented-By-carol"].into_iter().collect();
        assert!(is_mergeable(&labels, &req));
    }

    #[test]
    fn test_is_mergeable_empty_requirements() {
        assert!(is_mergeable(&LabelSet::new(), &[]));
        let labels: LabelSet = ["verified"].into_iter().collect();
        assert!(!is_mergeable(&labels, &[]));
        assert!(!is_mergeable(&LabelSet::new(), &required(&["Approved"])));
    }

    #[test]
    fn test_reset_on_new_commit() {
        let labels: LabelSet = [
            "verified",
            "Approved-By-bob",
            "ChangesRequestedBy-carol",
            "Commented-By-dave",
            "size/M",
            "hold",
        ]
        .into_iter()
        .collect();
        let mut mutations = reset_on_new_commit(&labels);
        mutations.sort_by(|a, b| a.label.cmp(&b.label));
        assert_eq!(
            mutations,
            vec![
                LabelMutation::remove("Approved-By-bob"),
                LabelMutation::remove("ChangesRequestedBy-carol"),
                LabelMutation::remove("Commented-By-dave"),
                LabelMutation::remove("verified"),
            ]
        );
    }
}
