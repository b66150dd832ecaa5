/// Color for labels that match no entry in [`LABEL_COLORS`].
pub const BASE_COLOR: &str = "D4C5F9";

/// Label name (or name prefix) to hex color.
///
/// Lookup picks the longest entry that prefixes the label, so `size/XL`
/// and `size/XXL` resolve to their own colors rather than a shorter match.
const LABEL_COLORS: &[(&str, &str)] = &[
    ("hold", "B60205"),
    ("wip", "B60205"),
    ("verified", "0E8A16"),
    ("lgtm", "0E8A16"),
    ("can-be-merged", "0E8A16"),
    ("needs-rebase", "B60205"),
    ("has-conflicts", "B60205"),
    ("size/XS", "EDEDED"),
    ("size/S", "0E8A16"),
    ("size/M", "F09C74"),
    ("size/L", "F5621C"),
    ("size/XL", "D93F0B"),
    ("size/XXL", "B60205"),
    ("Approved-By-", "0E8A16"),
    ("Reviewed-By-", "FBCA04"),
    ("ChangesRequestedBy-", "D93F0B"),
    ("Commented-By-", "D2B48C"),
    ("branch-", "1CD5C8"),
    ("target-version-", "F09C74"),
];

/// Derive a label's color from its name.
pub fn color_for(label: &str) -> &'static str {
    let lowered = label.to_lowercase();
    LABEL_COLORS
        .iter()
        .filter(|(prefix, _)| lowered.starts_with(&prefix.to_lowercase()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, color)| *color)
        .unwrap_or(BASE_COLOR)
}
