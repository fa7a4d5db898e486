//! Prompts for the builder model
//!
//! The builder is asked to express file changes as a `replace` function call
//! over the current state of one file. Four messages per call: the build
//! system prompt with the current state embedded, the original plan prompt,
//! the merged assistant reply, and the replace instruction. A replacement
//! retry appends the failed set and a correction instruction.

use anyhow::{Context as _, Result};
use serde_json::json;

use crate::ai::types::FunctionDefinition;
use crate::build::replacements::Replacement;
use crate::constants;

/// Schema of the single `replace` function exposed to the builder
pub fn replace_fn() -> FunctionDefinition {
    FunctionDefinition {
        name: constants::model::REPLACE_FN_NAME.to_string(),
        description: "Replace sections of the file. Each replacement substitutes the first \
                      occurrence of 'old' in the remaining file content with 'new'."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "replacements": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "old": {
                                "type": "string",
                                "description": "Exact text to replace, as it appears in the current file state"
                            },
                            "new": {
                                "type": "string",
                                "description": "Replacement text"
                            }
                        },
                        "required": ["old", "new"]
                    }
                }
            },
            "required": ["replacements"]
        }),
    }
}

/// System prompt for a build call, with the file's current state embedded
pub fn build_sys_prompt(path: &str, current_state: &str) -> String {
    format!(
        "You are a code builder. You are given the current state of a file, a plan, and a \
         description of changes to make to the file. Apply the described changes by calling the \
         'replace' function with a list of replacements. Each 'old' string must match the current \
         file state exactly, including whitespace, and must be unique enough to locate the edit. \
         List replacements in the order they appear in the file.\n\n{}",
        current_state_prompt(path, current_state)
    )
}

/// The current-state section embedded in the system prompt
fn current_state_prompt(path: &str, current_state: &str) -> String {
    format!("Current state of {}:\n\n```\n{}\n```", path, current_state)
}

/// Instruction to emit replacements for one path
pub fn replace_prompt(path: &str) -> String {
    format!(
        "Call the 'replace' function to apply the described changes to {}. Respond only with \
         the function call.",
        path
    )
}

/// Correction instruction embedding the failed replacement set
///
/// Sent on a replacement retry together with the prior (serialized) response,
/// so the model can see which `old` strings did not match.
pub fn correct_replacement_prompt(replacements: &[Replacement], current_state: &str) -> Result<String> {
    let failed: Vec<&Replacement> = replacements.iter().filter(|r| r.failed).collect();
    let failed_json =
        serde_json::to_string_pretty(&failed).context("error serializing failed replacements")?;

    Ok(format!(
        "Some replacements failed because their 'old' text was not found in the file:\n\n{}\n\n\
         The current state of the file is:\n\n```\n{}\n```\n\nCall the 'replace' function again \
         with corrected replacements. Every 'old' string must be copied exactly from the current \
         file state.",
        failed_json, current_state
    ))
}
