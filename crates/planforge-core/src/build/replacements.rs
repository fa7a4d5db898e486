//! Ordered replacement application
//!
//! A replacement set is applied left-to-right against the current state of a
//! file. Each `old` is matched against the first occurrence in the not yet
//! replaced suffix, so a repeated `old` string edits successive occurrences
//! in source order rather than the same one twice.

use serde::{Deserialize, Serialize};

/// One `(old -> new)` edit with provenance id and per-edit outcome
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Replacement {
    #[serde(default)]
    pub id: String,
    pub old: String,
    pub new: String,
    #[serde(default)]
    pub failed: bool,
}

/// Apply `replacements` in list order to `state`.
///
/// Returns the updated string and whether every replacement matched. A
/// replacement whose `old` is absent from the remaining suffix is skipped and,
/// when `set_failed` is set, flagged `failed = true`; application continues
/// with the rest of the list.
pub fn apply_replacements(
    state: &str,
    replacements: &mut [Replacement],
    set_failed: bool,
) -> (String, bool) {
    let mut updated = state.to_string();
    let mut search_from = 0;
    let mut all_succeeded = true;

    for replacement in replacements.iter_mut() {
        match updated[search_from..].find(&replacement.old) {
            Some(rel) => {
                let start = search_from + rel;
                let end = start + replacement.old.len();
                updated.replace_range(start..end, &replacement.new);
                search_from = start + replacement.new.len();
            }
            None => {
                all_succeeded = false;
                if set_failed {
                    replacement.failed = true;
                }
            }
        }
    }

    (updated, all_succeeded)
}
