//! Structured output parsing
//!
//! Models do not always return bare JSON even when a response format is
//! requested, so the reply is searched the way a reader would: raw JSON, then
//! a fenced code block, then the first balanced object in the prose.

use crate::error::{FinderError, FinderResult};
use crate::schemas::StageOutput;
use serde_json::Value;

/// Locate the JSON object in a model reply
pub fn extract_json(response: &str) -> Option<Value> {
    let trimmed = response.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(json_str) = extract_json_from_markdown(trimmed) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&json_str) {
            return Some(value);
        }
    }

    find_json_object(trimmed).and_then(|json_str| serde_json::from_str(&json_str).ok())
}

/// Extract JSON from markdown code blocks
fn extract_json_from_markdown(text: &str) -> Option<String> {
    if let Some(start) = text.find("```json") {
        let content = &text[start + 7..];
        if let Some(end) = content.find("```") {
            return Some(content[..end].trim().to_string());
        }
    }

    if let Some(start) = text.find("```") {
        let content = &text[start + 3..];
        if let Some(end) = content.find("```") {
            let potential_json = content[..end].trim();
            if potential_json.starts_with('{') && potential_json.ends_with('}') {
                return Some(potential_json.to_string());
            }
        }
    }

    None
}

/// Find the first balanced JSON object in text, skipping braces inside strings
fn find_json_object(text: &str) -> Option<String> {
    let mut depth = 0usize;
    let mut start_pos = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' if start_pos.is_some() => in_string = true,
            '{' => {
                if start_pos.is_none() {
                    start_pos = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(start) = start_pos.take() {
                        let json_str = &text[start..=i];
                        if serde_json::from_str::<Value>(json_str).is_ok() {
                            return Some(json_str.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Parse, schema-check and semantically validate a stage reply
pub fn parse_stage_output<T: StageOutput>(stage: &str, response: &str) -> FinderResult<T> {
    let value = extract_json(response).ok_or_else(|| {
        FinderError::schema_validation(stage, "reply does not contain a JSON object")
    })?;

    validate_against_schema(stage, &T::output_schema(), &value)?;

    let output: T = serde_json::from_value(value)
        .map_err(|e| FinderError::schema_validation(stage, e.to_string()))?;

    output
        .validate()
        .map_err(|message| FinderError::schema_validation(stage, message))?;

    Ok(output)
}

fn validate_against_schema(stage: &str, schema: &Value, instance: &Value) -> FinderResult<()> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        FinderError::internal_error(format!("{stage}: output schema does not compile: {e}"))
    })?;

    validator.validate(instance).map_err(|errors| {
        let messages: Vec<String> = errors
            .map(|e| format!("At '{}': {}", e.instance_path, e))
            .collect();
        FinderError::schema_validation(stage, messages.join("; "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::SelectedUrls;

    const FIVE_URLS: &str = r#"{"urls": ["https://a.com/1", "https://a.com/2", "https://a.com/3", "https://a.com/4", "https://a.com/5"]}"#;

    #[test]
    fn test_extract_raw_json() {
        let value = extract_json(FIVE_URLS).unwrap();
        assert_eq!(value["urls"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_extract_markdown_json() {
        let response = format!("Here are the picks:\n\n```json\n{FIVE_URLS}\n```\nDone.");
        assert!(extract_json(&response).is_some());
    }

    #[test]
    fn test_extract_embedded_json_with_braces_in_strings() {
        let response = r#"Result: {"note": "uses } and { inside", "ok": true} trailing"#;
        let value = extract_json(response).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_extract_rejects_prose() {
        assert!(extract_json("This is not JSON at all").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_parse_stage_output_success() {
        let selected: SelectedUrls = parse_stage_output("selection", FIVE_URLS).unwrap();
        assert_eq!(selected.urls[4], "https://a.com/5");
    }

    #[test]
    fn test_parse_stage_output_wrong_cardinality() {
        let error = parse_stage_output::<SelectedUrls>("selection", r#"{"urls": ["https://a.com/1"]}"#)
            .unwrap_err();
        match error {
            FinderError::SchemaValidation { stage, .. } => assert_eq!(stage, "selection"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_stage_output_wrong_type() {
        let error = parse_stage_output::<SelectedUrls>("selection", r#"{"urls": "https://a.com"}"#)
            .unwrap_err();
        assert!(matches!(error, FinderError::SchemaValidation { .. }));
    }

    #[test]
    fn test_parse_stage_output_no_json() {
        let error = parse_stage_output::<SelectedUrls>("selection", "I could not decide.").unwrap_err();
        assert!(error.to_string().contains("does not contain a JSON object"));
    }
}
