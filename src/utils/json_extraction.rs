//! Locating and validating the JSON object embedded in a model reply.
//!
//! Models rarely return bare JSON: answers arrive wrapped in markdown code
//! fences, preceded by a sentence of prose, or followed by commentary. This
//! module isolates the FIRST balanced top-level JSON object in such a
//! response, honoring string literals and escape sequences so that braces
//! inside strings never affect nesting depth.
//!
//! # Example
//!
//! ```
//! use quizforge::utils::json_extraction::extract_json_object;
//!
//! let response = "Sure! {\"text\": \"a {weird} string\"} Anything else?";
//! let json = extract_json_object(response).into_result().unwrap();
//! assert_eq!(json, "{\"text\": \"a {weird} string\"}");
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Why no usable JSON object could be taken from a reply.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("reply ends mid-object ({unclosed_braces} open braces, {unclosed_brackets} open brackets): {partial_preview}")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    #[error("No JSON object found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },
    #[error("Extracted JSON does not match the expected shape: {0}")]
    Shape(String),
}

/// Outcome of scanning a reply for its first JSON object.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// Successfully extracted a syntactically valid JSON object
    Success(String),
    /// An object starts but never closes
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
        unclosed_brackets: usize,
    },
    /// No JSON object found in response
    NotFound { content_preview: String },
}

impl JsonExtractionResult {
    /// A complete, parseable object was found.
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }

    /// The reply opened an object that never closed.
    pub fn is_truncated(&self) -> bool {
        matches!(self, JsonExtractionResult::Truncated { .. })
    }

    /// The object text, when one was found.
    pub fn json(&self) -> Option<&str> {
        match self {
            JsonExtractionResult::Success(json) => Some(json),
            _ => None,
        }
    }

    /// Turns a failed extraction into a [`JsonExtractionError`].
    pub fn into_result(self) -> Result<String, JsonExtractionError> {
        match self {
            JsonExtractionResult::Success(json) => Ok(json),
            JsonExtractionResult::Truncated {
                partial_json,
                unclosed_braces,
                unclosed_brackets,
            } => Err(JsonExtractionError::Truncated {
                partial_preview: preview(&partial_json, 100),
                unclosed_braces,
                unclosed_brackets,
            }),
            JsonExtractionResult::NotFound { content_preview } => {
                Err(JsonExtractionError::NotFound { content_preview })
            }
        }
    }
}

/// Depth counters left over after scanning a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonStructureAnalysis {
    /// Open `{` still waiting for a close.
    pub unclosed_braces: usize,
    /// Open `[` still waiting for a close.
    pub unclosed_brackets: usize,
    /// The scan finished inside an unterminated string.
    pub in_string: bool,
    /// Byte offset of the first `{` or `[`.
    pub json_start: Option<usize>,
}

impl JsonStructureAnalysis {
    /// True when some structure was opened but never closed.
    pub fn is_truncated(&self) -> bool {
        self.unclosed_braces > 0 || self.unclosed_brackets > 0 || self.in_string
    }
}

/// Scans `s` and reports how many braces and brackets remain open at the end.
///
/// Scans the content tracking brace/bracket depth outside string literals.
pub fn analyze_json_structure(s: &str) -> JsonStructureAnalysis {
    let mut brace_depth: isize = 0;
    let mut bracket_depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    let mut json_start: Option<usize> = None;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                json_start.get_or_insert(i);
                brace_depth += 1;
            }
            '}' if !in_string => brace_depth -= 1,
            '[' if !in_string => {
                json_start.get_or_insert(i);
                bracket_depth += 1;
            }
            ']' if !in_string => bracket_depth -= 1,
            _ => {}
        }
    }

    JsonStructureAnalysis {
        unclosed_braces: brace_depth.max(0) as usize,
        unclosed_brackets: bracket_depth.max(0) as usize,
        in_string,
        json_start,
    }
}

/// Finds the matching closing brace for the object starting at `s[0]`.
///
/// Handles nested braces, string literals (including escaped quotes) and
/// escape sequences. Returns the byte index of the matching `}`.
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
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn code_fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"```(?:json|JSON)?[ \t]*\r?\n?([\s\S]*?)\r?\n?```").ok())
        .as_ref()
}

/// Returns the body of the first markdown code fence, if any.
pub fn strip_code_fence(content: &str) -> Option<&str> {
    code_fence_regex()?
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Extracts the first balanced top-level JSON object from `content`.
///
/// A fenced block is searched first; otherwise the whole response is.
/// Top-level `{` positions are tried in order and the first candidate that
/// is both balanced and valid JSON wins, so a stray brace in leading prose
/// does not hide the real payload. A balanced candidate that fails to parse
/// is skipped as a whole.
pub fn extract_json_object(content: &str) -> JsonExtractionResult {
    let trimmed = content.trim();

    if let Some(fenced) = strip_code_fence(trimmed) {
        if let result @ JsonExtractionResult::Success(_) = scan_for_object(fenced) {
            return result;
        }
    }

    match scan_for_object(trimmed) {
        JsonExtractionResult::NotFound { .. } => JsonExtractionResult::NotFound {
            content_preview: preview(trimmed, 50),
        },
        other => other,
    }
}

fn scan_for_object(region: &str) -> JsonExtractionResult {
    let mut truncated: Option<JsonExtractionResult> = None;
    let mut cursor = 0;

    while let Some(offset) = region[cursor..].find('{') {
        let start = cursor + offset;
        let tail = &region[start..];
        match find_matching_brace(tail) {
            Some(end) => {
                let candidate = &tail[..=end];
                if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                    return JsonExtractionResult::Success(candidate.to_string());
                }
                // Braces nested in a rejected candidate are not top-level.
                cursor = start + end + 1;
            }
            None => {
                if truncated.is_none() {
                    let analysis = analyze_json_structure(tail);
                    truncated = Some(JsonExtractionResult::Truncated {
                        partial_json: tail.to_string(),
                        unclosed_braces: analysis.unclosed_braces,
                        unclosed_brackets: analysis.unclosed_brackets,
                    });
                }
                cursor = start + 1;
            }
        }
    }

    truncated.unwrap_or(JsonExtractionResult::NotFound {
        content_preview: preview(region, 50),
    })
}

/// Extracts the first JSON object and deserializes it into `T`.
pub fn parse_json_object<T: DeserializeOwned>(content: &str) -> Result<T, JsonExtractionError> {
    let json = extract_json_object(content).into_result()?;
    serde_json::from_str(&json).map_err(|e| JsonExtractionError::Shape(e.to_string()))
}

/// Returns at most `max_chars` characters of `s`, on a char boundary.
pub fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_direct_json() {
        let input = r#"{"key": "value"}"#;
        assert_eq!(extract_json_object(input).json(), Some(input));
    }

    #[test]
    fn test_json_fence_stripped() {
        let input = "Here is the response:\n```json\n{\"key\": \"value\"}\n```\nHope this helps!";
        assert_eq!(extract_json_object(input).json(), Some(r#"{"key": "value"}"#));
    }

    #[test]
    fn test_untagged_fence_stripped() {
        let input = "Response:\n```\n{\"key\": \"value\"}\n```";
        assert_eq!(extract_json_object(input).json(), Some(r#"{"key": "value"}"#));
    }

    #[test]
    fn test_prose_before_and_after() {
        let input =
            r#"Here is the batch: {"name": "test", "count": 5} Let me know if you need more."#;
        assert_eq!(
            extract_json_object(input).json(),
            Some(r#"{"name": "test", "count": 5}"#)
        );
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let input = r#"{"text": "a {weird} string"}"#;
        let result = extract_json_object(input);
        assert!(!result.is_truncated());
        assert_eq!(result.json(), Some(input));
    }

    #[test]
    fn test_unbalanced_brace_inside_string() {
        let input = r#"Result: {"text": "opens { but never closes", "n": 1} done"#;
        assert_eq!(
            extract_json_object(input).json(),
            Some(r#"{"text": "opens { but never closes", "n": 1}"#)
        );
    }

    #[test]
    fn test_escaped_quotes() {
        let input = r#"{"message": "He said \"hello {there}\""}"#;
        assert_eq!(extract_json_object(input).json(), Some(input));
    }

    #[test]
    fn test_first_object_wins() {
        let input = r#"{"a": 1} and later {"b": {"c": 2}, "d": [1, 2, 3]}"#;
        assert_eq!(extract_json_object(input).json(), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn test_stray_brace_in_prose_is_skipped() {
        let input = r#"Use the {template} below: {"questions": []}"#;
        assert_eq!(extract_json_object(input).json(), Some(r#"{"questions": []}"#));
    }

    #[test]
    fn test_invalid_outer_object_does_not_yield_inner() {
        let input = r#"{"questions": [{"a": 1},]}"#;
        assert!(matches!(
            extract_json_object(input),
            JsonExtractionResult::NotFound { .. }
        ));

        let input = r#"{"questions": [{"a": 1},]} then {"b": 2}"#;
        assert_eq!(extract_json_object(input).json(), Some(r#"{"b": 2}"#));
    }

    #[test]
    fn test_nested_objects() {
        let input = r#"{"outer": {"inner": "value"}, "list": [{"x": 1}]}"#;
        assert_eq!(extract_json_object(input).json(), Some(input));
    }

    #[test]
    fn test_truncated_object() {
        let input = r#"Here: {"questions": [{"statement": "What is"#;
        match extract_json_object(input) {
            JsonExtractionResult::Truncated {
                partial_json,
                unclosed_braces,
                unclosed_brackets,
            } => {
                assert!(partial_json.starts_with("{\"questions\""));
                assert_eq!(unclosed_braces, 2);
                assert_eq!(unclosed_brackets, 1);
            }
            other => panic!("expected truncated, got {other:?}"),
        }
    }

    #[test]
    fn test_not_found() {
        let result = extract_json_object("I cannot help with that.");
        assert!(matches!(result, JsonExtractionResult::NotFound { .. }));
        let err = result.into_result().unwrap_err();
        assert!(err.to_string().contains("I cannot help"));
    }

    #[test]
    fn test_empty_content() {
        assert!(matches!(
            extract_json_object("   "),
            JsonExtractionResult::NotFound { .. }
        ));
    }

    #[test]
    fn test_find_matching_brace() {
        assert_eq!(find_matching_brace("{}"), Some(1));
        assert_eq!(find_matching_brace(r#"{"a": {"b": "c"}}"#), Some(16));
        assert_eq!(find_matching_brace(r#"{"braces": "{ not a brace }"}"#), Some(28));
        assert_eq!(find_matching_brace(r#"{"a": 1"#), None);
    }

    #[test]
    fn test_open_depths_reported() {
        let analysis = analyze_json_structure(r#"prefix {"a": ["#);
        assert_eq!(analysis.unclosed_braces, 1);
        assert_eq!(analysis.unclosed_brackets, 1);
        assert_eq!(analysis.json_start, Some(7));
        assert!(analysis.is_truncated());

        let open_string = analyze_json_structure(r#"{"a": "unterminated"#);
        assert!(open_string.in_string);
    }

    #[test]
    fn test_parse_json_object_typed() {
        #[derive(Debug, Deserialize)]
        struct Verdict {
            score: f64,
        }

        let verdict: Verdict =
            parse_json_object("```json\n{\"score\": 0.8}\n```").expect("should parse");
        assert!((verdict.score - 0.8).abs() < f64::EPSILON);

        let shape = parse_json_object::<Verdict>(r#"{"other": true}"#).unwrap_err();
        assert!(matches!(shape, JsonExtractionError::Shape(_)));
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        assert_eq!(preview("ação é ótima", 4), "ação");
    }
}
