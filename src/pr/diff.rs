use super::types::SizeMetrics;

/// Count added and removed lines in a unified diff.
///
/// Accepts either a full `git diff` (with `diff --git` / `---` / `+++`
/// headers) or the header-less per-file hunks GitLab returns from its
/// `diffs` endpoint. Only lines inside a hunk are counted, so file headers
/// never inflate the totals.
pub fn count_changed_lines(raw_diff: &str) -> SizeMetrics {
    let mut metrics = SizeMetrics::default();
    let mut in_hunk = false;

    for line in raw_diff.lines() {
        if line.starts_with("diff --git ") {
            in_hunk = false;
            continue;
        }

        if line.starts_with("@@") {
            in_hunk = true;
            continue;
        }

        if !in_hunk {
            continue;
        }

        if line.starts_with('+') {
            metrics.additions += 1;
        } else if line.starts_with('-') {
            metrics.deletions += 1;
        }
    }

    metrics
}

/// Sum the metrics of several per-file diffs.
pub fn count_files<'a>(diffs: impl IntoIterator<Item = &'a str>) -> SizeMetrics {
    diffs
        .into_iter()
        .map(count_changed_lines)
        .fold(SizeMetrics::default(), |acc, m| SizeMetrics {
            additions: acc.additions + m.additions,
            deletions: acc.deletions + m.deletions,
        })
}
