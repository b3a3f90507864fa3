//! Heuristic clean-up of raw model output before it is parsed as JSON.
//!
//! Only structural noise is removed: markdown fences, surrounding prose, and
//! unclosed braces or brackets at the end of a truncated object.

use serde_json::Value;

use stagecraft_core::error::StructuralError;

/// Strip fences, cut to the outermost JSON object, and balance closers.
pub fn heuristic_repair(output: &str) -> String {
    let stripped = strip_code_fences(output);
    let trimmed = stripped.trim();

    let candidate = match trimmed.find(['{', '[']) {
        Some(start) if start > 0 => &trimmed[start..],
        _ => trimmed,
    };

    if candidate.starts_with('{') || candidate.starts_with('[') {
        balance_braces(trim_trailing_prose(candidate))
    } else {
        candidate.to_string()
    }
}

/// Repair and parse raw output into a JSON value.
pub fn parse_json_output(output: &str) -> Result<Value, StructuralError> {
    if output.trim().is_empty() {
        return Err(StructuralError::EmptyResponse);
    }
    let repaired = heuristic_repair(output);
    serde_json::from_str(&repaired).map_err(|e| StructuralError::Malformed(e.to_string()))
}

/// Strip markdown code fences from text.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();

    let Some(start) = trimmed.find("```") else {
        return trimmed.to_string();
    };
    let after = &trimmed[start + 3..];
    // Skip the language tag, if any, on the opening fence line.
    let content_start = after.find('\n').map_or(0, |p| p + 1);
    let body = &after[content_start..];
    match body.find("```") {
        Some(end) => body[..end].trim().to_string(),
        None => body.trim().to_string(),
    }
}

/// Drop anything after the last closing brace/bracket, e.g. "...} Hope this helps!".
fn trim_trailing_prose(text: &str) -> &str {
    match text.rfind(['}', ']']) {
        Some(end) if text[end + 1..].chars().any(|c| !c.is_whitespace()) => {
            let tail = &text[end + 1..];
            // Only cut if the tail has no structure of its own.
            if tail.contains(['{', '[', '"']) {
                text
            } else {
                &text[..=end]
            }
        }
        _ => text,
    }
}

/// Append the closers a truncated object is missing, innermost first.
fn balance_braces(text: &str) -> String {
    let mut open: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape_next = false;

    for ch in text.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if in_string {
            match ch {
                '\\' => escape_next = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => open.push('}'),
            '[' => open.push(']'),
            '}' | ']' => {
                if open.last() == Some(&ch) {
                    open.pop();
                }
            }
            _ => {}
        }
    }

    let mut result = text.to_string();
    if in_string {
        result.push('"');
    }
    while let Some(closer) = open.pop() {
        result.push(closer);
    }
    result
}
