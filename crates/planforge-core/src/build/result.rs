//! Plan-result assembly
//!
//! Packages a streamed replacement set into a persisted `PlanFileResult`:
//! sort by position in the current state, apply to flag failures, stamp ids.

use uuid::Uuid;

use crate::ai::types::StreamedReplacement;
use crate::build::replacements::{apply_replacements, Replacement};
use crate::storage::types::{Context, PlanFileResult};

pub(crate) struct PlanResultParams<'a> {
    pub org_id: &'a str,
    pub plan_id: &'a str,
    pub plan_build_id: &'a str,
    pub convo_message_ids: &'a [String],
    pub path: &'a str,
    pub current_state: &'a str,
    pub context: Option<&'a Context>,
    pub replacements: Vec<StreamedReplacement>,
}

/// Build the `PlanFileResult` for a parsed replacement set.
///
/// Replacements are ordered by the first occurrence of `old` in the current
/// state; ones whose `old` is absent go last so they cannot disturb the order
/// of valid edits. Returns the result and whether every replacement applied.
pub(crate) fn assemble_plan_result(params: PlanResultParams<'_>) -> (PlanFileResult, bool) {
    let mut replacements: Vec<Replacement> = params
        .replacements
        .into_iter()
        .map(|r| Replacement {
            id: String::new(),
            old: r.old,
            new: r.new,
            failed: false,
        })
        .collect();

    replacements.sort_by_key(|r| {
        params
            .current_state
            .find(&r.old)
            .unwrap_or(usize::MAX)
    });

    let (_, all_succeeded) = apply_replacements(params.current_state, &mut replacements, true);

    for replacement in &mut replacements {
        replacement.id = Uuid::new_v4().to_string();
    }

    let (context_sha, context_body) = match params.context {
        Some(context) => (context.sha.clone(), context.body.clone()),
        None => (String::new(), String::new()),
    };

    let result = PlanFileResult {
        org_id: params.org_id.to_string(),
        plan_id: params.plan_id.to_string(),
        plan_build_id: params.plan_build_id.to_string(),
        convo_message_ids: params.convo_message_ids.to_vec(),
        path: params.path.to_string(),
        content: String::new(),
        replacements,
        context_sha,
        context_body,
        any_failed: !all_succeeded,
    };

    (result, all_succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streamed(old: &str, new: &str) -> StreamedReplacement {
        StreamedReplacement {
            old: old.to_string(),
            new: new.to_string(),
        }
    }

    fn params<'a>(
        current_state: &'a str,
        context: Option<&'a Context>,
        replacements: Vec<StreamedReplacement>,
        convo_message_ids: &'a [String],
    ) -> PlanResultParams<'a> {
        PlanResultParams {
            org_id: "org-1",
            plan_id: "plan-1",
            plan_build_id: "build-1",
            convo_message_ids,
            path: "foo.go",
            current_state,
            context,
            replacements,
        }
    }

    #[test]
    fn test_single_edit_success() {
        let ids = vec!["msg-1".to_string()];
        let (result, ok) = assemble_plan_result(params(
            "a\nb\nc\n",
            None,
            vec![streamed("b", "B")],
            &ids,
        ));
        assert!(ok);
        assert!(!result.any_failed);
        assert_eq!(result.replacements.len(), 1);
        assert!(result.content.is_empty());
        assert_eq!(result.convo_message_ids, ids);

        let mut reps = result.replacements.clone();
        let (updated, _) = apply_replacements("a\nb\nc\n", &mut reps, false);
        assert_eq!(updated, "a\nB\nc\n");
    }

    #[test]
    fn test_sorts_by_position_in_current_state() {
        let ids = vec!["msg-1".to_string()];
        let (result, ok) = assemble_plan_result(params(
            "one two three",
            None,
            vec![streamed("three", "3"), streamed("one", "1")],
            &ids,
        ));
        assert!(ok);
        assert_eq!(result.replacements[0].old, "one");
        assert_eq!(result.replacements[1].old, "three");
    }

    #[test]
    fn test_missing_old_sorts_last_and_flags_failure() {
        let ids = vec!["msg-1".to_string()];
        let (result, ok) = assemble_plan_result(params(
            "a b c",
            None,
            vec![streamed("absent", "X"), streamed("a", "A"), streamed("c", "C")],
            &ids,
        ));
        assert!(!ok);
        assert!(result.any_failed);
        // Valid edits keep their source order; the miss goes last.
        assert_eq!(result.replacements[0].old, "a");
        assert_eq!(result.replacements[1].old, "c");
        assert_eq!(result.replacements[2].old, "absent");
        assert!(result.replacements[2].failed);
        assert!(!result.replacements[0].failed);
    }

    #[test]
    fn test_stamps_unique_ids() {
        let ids = vec!["msg-1".to_string()];
        let (result, _) = assemble_plan_result(params(
            "a b",
            None,
            vec![streamed("a", "A"), streamed("b", "B")],
            &ids,
        ));
        assert!(!result.replacements[0].id.is_empty());
        assert!(!result.replacements[1].id.is_empty());
        assert_ne!(result.replacements[0].id, result.replacements[1].id);
    }

    #[test]
    fn test_context_propagates() {
        let ids = vec!["msg-1".to_string()];
        let context = Context {
            sha: "abc123".to_string(),
            body: "a b".to_string(),
        };
        let (result, _) = assemble_plan_result(params(
            "a b",
            Some(&context),
            vec![streamed("a", "A")],
            &ids,
        ));
        assert_eq!(result.context_sha, "abc123");
        assert_eq!(result.context_body, "a b");
    }

    #[test]
    fn test_no_context_leaves_fields_empty() {
        let ids = vec!["msg-1".to_string()];
        let (result, _) =
            assemble_plan_result(params("a b", None, vec![streamed("a", "A")], &ids));
        assert!(result.context_sha.is_empty());
        assert!(result.context_body.is_empty());
    }
}
