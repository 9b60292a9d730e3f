//! Merging stage outputs into the nested result structure.

use crate::core::{Results, StageValue};

/// Stores what a stage produced under `results[stage]`.
///
/// - a parallel group alone is stored as its nested map
/// - step outputs alone are stored as the ordered output list
/// - with both, the step outputs are stored inside the nested map under the
///   stage's own name, after the branches
///
/// A stage that produced neither contributes no entry.
pub fn merge_stage(
    results: &mut Results,
    stage: &str,
    group: Option<Results>,
    outputs: Option<Vec<String>>,
) {
    let value = match (group, outputs) {
        (None, None) => return,
        (Some(nested), None) => StageValue::Nested(nested),
        (None, Some(outputs)) => StageValue::Outputs(outputs),
        (Some(mut nested), Some(outputs)) => {
            nested.insert(stage, StageValue::Outputs(outputs));
            StageValue::Nested(nested)
        }
    };
    results.insert(stage, value);
}

/// Folds per-branch result maps into one nested map, in the given order.
pub fn merge_branches(branches: impl IntoIterator<Item = Results>) -> Results {
    let mut nested = Results::new();
    for branch in branches {
        for (name, value) in branch.into_entries() {
            nested.insert(name, value);
        }
    }
    nested
}
