//! Strict structured-output parsing.
//!
//! Samplers frequently append trailing commentary after their payload, so
//! the parser extracts the last complete top-level JSON object by scanning
//! brace depth from the end of the text. Any failure is a red flag: parsing
//! is one shot, with no repair pass.

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};

/// Extracts the last complete top-level JSON object from the text.
///
/// Returns `None` when no matched brace pair is found.
#[must_use]
pub fn last_json_object(text: &str) -> Option<&str> {
    let mut depth = 0i64;
    let mut end: Option<usize> = None;

    for (i, c) in text.char_indices().rev() {
        match c {
            '}' => {
                if depth == 0 {
                    end = Some(i + 1);
                }
                depth += 1;
            }
            '{' => {
                depth -= 1;
                if depth == 0
                    && let Some(end) = end
                {
                    return Some(&text[i..end]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Parses the last JSON object in `raw` into `T`.
///
/// # Errors
///
/// Returns [`Error::RedFlag`] when no object is found, the candidate is not
/// valid JSON, or it does not match the target schema.
pub fn parse_last_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let candidate = last_json_object(raw)
        .ok_or_else(|| Error::red_flag("no complete JSON object in output"))?;

    serde_json::from_str(candidate)
        .map_err(|e| Error::red_flag(format!("invalid format or schema: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Payload {
        v: u32,
    }

    #[test]
    fn test_bare_object() {
        assert_eq!(last_json_object(r#"{"v":1}"#), Some(r#"{"v":1}"#));
    }

    #[test]
    fn test_trailing_commentary() {
        let raw = r#"{"v":1} Hope this helps! Let me know."#;
        assert_eq!(last_json_object(raw), Some(r#"{"v":1}"#));
    }

    #[test]
    fn test_leading_prose() {
        let raw = r#"Here is the result: {"v":2}"#;
        let parsed: Payload = parse_last_json(raw).unwrap();
        assert_eq!(parsed, Payload { v: 2 });
    }

    #[test]
    fn test_picks_last_of_several() {
        let raw = r#"{"v":1} and then {"v":2}"#;
        assert_eq!(last_json_object(raw), Some(r#"{"v":2}"#));
    }

    #[test]
    fn test_nested_object() {
        let raw = r#"text {"outer":{"inner":3}} tail"#;
        assert_eq!(last_json_object(raw), Some(r#"{"outer":{"inner":3}}"#));
    }

    #[test]
    fn test_no_object_is_none() {
        assert!(last_json_object("no json here").is_none());
        assert!(last_json_object("unbalanced } brace").is_none());
        assert!(last_json_object("").is_none());
    }

    #[test]
    fn test_missing_object_red_flags() {
        let err = parse_last_json::<Payload>("oops bad json").unwrap_err();
        assert!(matches!(err, Error::RedFlag { .. }));
    }

    #[test]
    fn test_schema_mismatch_red_flags() {
        let err = parse_last_json::<Payload>(r#"{"other":"field"}"#).unwrap_err();
        assert!(matches!(err, Error::RedFlag { .. }));
    }

    #[test]
    fn test_malformed_candidate_red_flags() {
        let err = parse_last_json::<Payload>(r#"{"v":}"#).unwrap_err();
        assert!(matches!(err, Error::RedFlag { .. }));
    }

    #[test]
    fn test_unicode_payload() {
        #[derive(Deserialize)]
        struct Named {
            name: String,
        }
        let parsed: Named = parse_last_json(r#"{"name":"研究報告"}"#).unwrap();
        assert_eq!(parsed.name, "研究報告");
    }
}
