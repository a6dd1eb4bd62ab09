use std::collections::HashSet;

use crate::plan::{PlanDocument, PlanRow};
use crate::tracker::Exam;

/// Title normalized for duplicate detection: whitespace runs collapsed,
/// lower-cased.
pub fn title_key(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn merge_key(title: &str, cfu: u32) -> (String, u32) {
    (title_key(title), cfu)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: Vec<Exam>,
    pub skipped: usize,
}

/// Picks rows by index; `None` selects all. Returns the first out-of-range
/// index on failure.
pub fn select_rows<'a>(
    plan: &'a PlanDocument,
    indices: Option<&[usize]>,
) -> Result<Vec<&'a PlanRow>, usize> {
    let Some(indices) = indices else {
        return Ok(plan.rows.iter().collect());
    };
    indices
        .iter()
        .map(|&i| plan.rows.get(i).ok_or(i))
        .collect()
}

/// Builds new exams for the selected rows, skipping any whose
/// (title, cfu) key is already present in `existing` or earlier in the
/// selection.
pub fn merge_rows<'a, I>(existing: &[Exam], rows: I) -> MergeOutcome
where
    I: IntoIterator<Item = &'a PlanRow>,
{
    let mut seen: HashSet<(String, u32)> = existing
        .iter()
        .map(|e| merge_key(&e.name, e.cfu))
        .collect();
    let mut added = Vec::new();
    let mut skipped = 0usize;
    for row in rows {
        if !seen.insert(merge_key(&row.denominazione, row.cfu)) {
            skipped += 1;
            continue;
        }
        added.push(Exam::new(&row.denominazione, row.cfu, ""));
    }
    MergeOutcome { added, skipped }
}
