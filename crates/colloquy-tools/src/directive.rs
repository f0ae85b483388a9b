//! Extraction of `TOOL_CALL` directives from model output.
//!
//! A directive has the form `TOOL_CALL:<name>:<json-object>`. The argument
//! object is delimited by brace matching that tracks JSON strings and
//! escapes, so nested braces inside string values survive. Malformed
//! directives are logged and skipped; they never abort parsing.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Marker a model emits instead of a corrected directive when it judges a
/// failed call unfixable.
pub const GIVE_UP_MARKER: &str = "TOOL_CALL_ABORT";

const MARKER: &str = "TOOL_CALL:";

/// A parsed tool invocation request. Transient; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

fn valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Find the JSON object starting at the first non-whitespace character.
///
/// Returns the byte range of one balanced object within `s`, or `None`
/// when the text does not start with `{` or the braces never balance.
fn extract_json_object(s: &str) -> Option<(usize, usize)> {
    let start = s.find(|c: char| !c.is_whitespace())?;
    if !s[start..].starts_with('{') {
        return None;
    }

    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in s[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((start, start + i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract all well-formed directives from `text`, in discovery order.
pub fn parse_directives(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some(rel) = text[cursor..].find(MARKER) {
        let after_marker = cursor + rel + MARKER.len();
        // Default resume point: right after the marker, so a malformed
        // directive cannot hide a later well-formed one.
        cursor = after_marker;

        let rest = &text[after_marker..];
        let Some(colon) = rest.find(':') else {
            warn!("Dropping TOOL_CALL directive without argument separator");
            continue;
        };
        let name = &rest[..colon];
        if !valid_tool_name(name) {
            warn!(name, "Dropping TOOL_CALL directive with invalid tool name");
            continue;
        }

        let json_at = after_marker + colon + 1;
        let json_part = &text[json_at..];
        let Some((obj_start, obj_end)) = extract_json_object(json_part) else {
            warn!(tool = name, "Dropping TOOL_CALL directive with unbalanced arguments");
            continue;
        };
        let raw = &json_part[obj_start..obj_end];

        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(arguments) if arguments.is_object() => {
                // Skip past the consumed object so its content is not rescanned.
                cursor = json_at + obj_end;
                calls.push(ToolCall {
                    tool_name: name.to_string(),
                    arguments,
                });
            }
            Ok(_) => {
                warn!(tool = name, "Dropping TOOL_CALL directive with non-object arguments");
            }
            Err(e) => {
                warn!(tool = name, error = %e, "Dropping TOOL_CALL directive with invalid JSON");
            }
        }
    }

    calls
}
