//! JSON utilities for the course system client.
//!
//! The election data feed is a JavaScript assignment, not JSON:
//!
//! ```text
//! var lessonJSONs = [{id:1001,no:'2024001.01',name:'高等数学',credits:5.0,...}];
//! ```
//!
//! [`repair_course_feed`] turns that into JSON with fixed text rewrites. It is a compatibility
//! shim for exactly this wrapper (version 1), not a JavaScript or JSON5 parser; if the course
//! system ever changes the wrapper the decode step fails loudly instead of yielding bad data.

use anyhow::{Result, anyhow};
use regex::Regex;
use std::sync::LazyLock;

/// Character length of the `var lessonJSONs = ` prefix.
pub const FEED_PREFIX_CHARS: usize = 18;
/// Character length of the trailing `;`.
pub const FEED_SUFFIX_CHARS: usize = 1;

static BARE_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(,|\{)\s*(\w+)\s*:").unwrap());

/// Strip the JavaScript assignment around the feed's array literal.
pub fn strip_feed_wrapper(raw: &str) -> Result<&str> {
    let raw = raw.trim_end();
    let total = raw.chars().count();
    if total < FEED_PREFIX_CHARS + FEED_SUFFIX_CHARS {
        return Err(anyhow!(
            "course feed is too short to carry its wrapper ({total} characters)"
        ));
    }

    let start = raw
        .char_indices()
        .nth(FEED_PREFIX_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(raw.len());
    let end = raw
        .char_indices()
        .nth(total - FEED_SUFFIX_CHARS)
        .map(|(i, _)| i)
        .unwrap_or(raw.len());

    Ok(&raw[start..end])
}

/// Quote bare object keys and turn single-quoted strings into double-quoted ones.
pub fn quote_object_literal(text: &str) -> String {
    BARE_KEY
        .replace_all(text, r#"${1}"${2}":"#)
        .replace('\'', "\"")
}

/// Turn the raw data feed into a JSON document.
pub fn repair_course_feed(raw: &str) -> Result<String> {
    let inner = strip_feed_wrapper(raw)?;
    let repaired = quote_object_literal(inner);
    let trimmed = repaired.trim_start();
    if !trimmed.starts_with('[') && !trimmed.starts_with('{') {
        let preview: String = trimmed.chars().take(20).collect();
        return Err(anyhow!(
            "repaired course feed does not start with a JSON value: {preview:?}"
        ));
    }
    Ok(repaired)
}

/// Attempt to parse JSON and, on failure, include a contextual snippet of the
/// line where the error occurred along with the serde path and type mismatch.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let jd = &mut serde_json::Deserializer::from_str(body);
    match serde_path_to_error::deserialize(jd) {
        Ok(value) => Ok(value),
        Err(err) => {
            let inner_err = err.inner();
            let (line, column) = (inner_err.line(), inner_err.column());
            let path = err.path().to_string();

            let msg = inner_err.to_string();
            let loc = format!(" at line {line} column {column}");
            let msg_without_loc = msg.strip_suffix(&loc).unwrap_or(&msg).to_string();

            let type_info = parse_type_mismatch(&msg_without_loc);
            let snippet = build_error_snippet(body, line, column, 20);

            let mut final_err = String::new();
            if !path.is_empty() && path != "." {
                final_err.push_str(&format!("at path '{}': ", path));
            }
            final_err.push_str(&format!(
                "{} (line {} col {})\n{}",
                type_info, line, column, snippet
            ));

            Err(anyhow!(final_err))
        }
    }
}

/// Extract type mismatch information from a serde error message.
///
/// Turns "invalid type: null, expected a string" into "expected a string, got null";
/// other messages are returned without their location suffix.
fn parse_type_mismatch(error_msg: &str) -> String {
    if let Some(invalid_start) = error_msg.find("invalid type: ") {
        let after_prefix = &error_msg[invalid_start + "invalid type: ".len()..];

        if let Some(comma_pos) = after_prefix.find(", expected ") {
            let actual_type = &after_prefix[..comma_pos];
            let expected_part = &after_prefix[comma_pos + ", expected ".len()..];

            let expected_type = expected_part
                .split(" at line ")
                .next()
                .unwrap_or(expected_part)
                .trim();

            return format!("expected {}, got {}", expected_type, actual_type);
        }
    }

    if error_msg.starts_with("expected ")
        && let Some(expected_part) = error_msg.split(" at line ").next()
    {
        return expected_part.to_string();
    }

    error_msg.to_string()
}

/// Show roughly `context_len` bytes of the failing line with a caret under the error column.
///
/// Course names are Chinese, so slice bounds are widened to the nearest char boundaries.
fn build_error_snippet(body: &str, line: usize, column: usize, context_len: usize) -> String {
    let target_line = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target_line.is_empty() {
        return "(empty line)".to_string();
    }

    // column is 1-based, convert to 0-based for slicing
    let error_idx = column.saturating_sub(1).min(target_line.len());

    let half_len = context_len / 2;
    let mut start = error_idx.saturating_sub(half_len);
    while !target_line.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (error_idx + half_len).min(target_line.len());
    while !target_line.is_char_boundary(end) {
        end += 1;
    }

    let slice = &target_line[start..end];
    let indicator_pos = target_line[start..error_idx.max(start)].chars().count();
    let indicator = " ".repeat(indicator_pos) + "^";

    format!("...{slice}...\n   {indicator}")
}
