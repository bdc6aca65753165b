//! JSON extraction from LLM replies.
//!
//! Models wrap JSON in markdown fences, prose, or both, and occasionally emit
//! trailing commas. This module recovers the payload anyway.

use regex::Regex;
use serde_json::Value;

/// Extracts the first JSON value from `text`.
///
/// Tries, in order: a fenced ```json block, then the first bare object or
/// array found by bracket matching. Trailing commas are stripped on a retry
/// before giving up.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(candidate) = fenced_block(text) {
        if let Some(value) = parse_lenient(&candidate) {
            return Some(value);
        }
    }

    if let Some(candidate) = bare_json(text) {
        if let Some(value) = parse_lenient(candidate) {
            return Some(value);
        }
    }

    // The whole reply might already be JSON.
    parse_lenient(text.trim())
}

/// Contents of the first fenced code block, json-tagged or not.
fn fenced_block(text: &str) -> Option<String> {
    let re = Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok()?;
    re.captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// The first balanced `{...}` or `[...]` span, respecting string literals.
fn bare_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses, retrying once with trailing commas removed.
fn parse_lenient(candidate: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(candidate) {
        return Some(value);
    }
    let re = Regex::new(r",\s*([}\]])").ok()?;
    let cleaned = re.replace_all(candidate, "$1");
    serde_json::from_str(&cleaned).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fenced_json_block() {
        let text = "Here you go:\n```json\n{\"key\": \"value\"}\n```\nDone.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_untagged_fence() {
        let text = "```\n[1, 2, 3]\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_bare_object_in_prose() {
        let text = "The result is {\"pairs\": [{\"q\": \"a\"}]} as requested.";
        let value = extract_json(text).unwrap();
        assert!(value["pairs"].is_array());
    }

    #[test]
    fn test_braces_inside_strings_ignored() {
        let text = "answer: {\"text\": \"a } tricky { string\"} end";
        let value = extract_json(text).unwrap();
        assert_eq!(value["text"], "a } tricky { string");
    }

    #[test]
    fn test_trailing_comma_recovered() {
        let text = "{\"items\": [1, 2,],}";
        let value = extract_json(text).unwrap();
        assert_eq!(value["items"], serde_json::json!([1, 2]));
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(extract_json("no structured data here").is_none());
    }
}
