//! JSON extraction for agent replies.
//!
//! Models are asked for a single JSON object but routinely wrap it in a
//! markdown fence or surround it with prose. Extraction tries, in order:
//! 1. The whole (trimmed) content
//! 2. The body of a ```json or generic ``` fence
//! 3. The first balanced `{...}` object found in the content

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("Reply was empty")]
    Empty,

    #[error("No JSON object found in reply. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },

    #[error("JSON appears truncated: {unclosed_braces} unclosed braces")]
    Truncated { unclosed_braces: usize },

    #[error("Expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },
}

fn code_fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"```(?:json|JSON)?\s*\n?([\s\S]*?)\n?```").expect("static regex is valid")
    })
}

/// Extracts the first JSON object from an agent reply.
pub fn extract_json_object(content: &str) -> Result<Map<String, Value>, JsonExtractionError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(JsonExtractionError::Empty);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return into_object(value);
    }

    if let Some(body) = code_fence_regex()
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
    {
        if let Ok(value) = serde_json::from_str::<Value>(body) {
            return into_object(value);
        }
    }

    let Some(start) = trimmed.find('{') else {
        return Err(JsonExtractionError::NotFound {
            content_preview: trimmed.chars().take(50).collect(),
        });
    };
    let candidate = &trimmed[start..];
    match find_matching_brace(candidate) {
        Some(end) => serde_json::from_str::<Value>(&candidate[..=end])
            .map_err(|_| JsonExtractionError::NotFound {
                content_preview: candidate.chars().take(50).collect(),
            })
            .and_then(into_object),
        None => Err(JsonExtractionError::Truncated {
            unclosed_braces: count_unclosed_braces(candidate),
        }),
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>, JsonExtractionError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Array(_) => Err(JsonExtractionError::NotAnObject { found: "array" }),
        Value::String(_) => Err(JsonExtractionError::NotAnObject { found: "string" }),
        Value::Number(_) => Err(JsonExtractionError::NotAnObject { found: "number" }),
        Value::Bool(_) => Err(JsonExtractionError::NotAnObject { found: "boolean" }),
        Value::Null => Err(JsonExtractionError::NotAnObject { found: "null" }),
    }
}

/// Returns the byte index of the brace closing the object that starts at
/// the beginning of `s`, honouring string literals and escapes.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn count_unclosed_braces(s: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    depth
}
