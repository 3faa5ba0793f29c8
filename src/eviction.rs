// vault-tasks/src/eviction.rs

use std::collections::{BTreeMap, BTreeSet};

use crate::task::{DocumentId, Task};

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub fn retention_ms(days: u32) -> i64 { i64::from(days) * DAY_MS }

/// Completed, dated tasks whose completion is at least `retention_ms` old.
/// A retention of zero makes every completed task eligible at once.
pub fn select_for_eviction(tasks: &[Task], retention_ms: i64, now: i64) -> Vec<&Task> {
    tasks
        .iter()
        .filter(|t| t.completed_age_ms(now).is_some_and(|age| age >= retention_ms))
        .collect()
}

/// Groups line indices per document, deduplicated, highest first.
///
/// Removing lines one at a time only keeps the remaining indices valid when
/// the larger ones go first.
pub fn plan_removals<'a, I>(selected: I) -> BTreeMap<DocumentId, Vec<usize>>
where
    I: IntoIterator<Item = &'a Task>,
{
    let mut by_doc: BTreeMap<DocumentId, BTreeSet<usize>> = BTreeMap::new();
    for t in selected {
        by_doc.entry(t.document_id.clone()).or_default().insert(t.line_index);
    }
    by_doc
        .into_iter()
        .map(|(doc, lines)| (doc, lines.into_iter().rev().collect()))
        .collect()
}

/// Removes each index in the order given. Out-of-range indices are skipped.
pub fn apply_removals(full_text: &str, line_indices: &[usize]) -> String {
    let mut lines: Vec<&str> = full_text.split('\n').collect();
    for &i in line_indices {
        if i < lines.len() { lines.remove(i); }
    }
    lines.join("\n")
}

/// Rebuilds the text without the marked lines; all indices refer to the original text.
pub fn retain_lines(full_text: &str, remove: &BTreeSet<usize>) -> String {
    full_text
        .split('\n')
        .enumerate()
        .filter(|(i, _)| !remove.contains(i))
        .map(|(_, l)| l)
        .collect::<Vec<_>>()
        .join("\n")
}
