use serde_json::{Map, Value};

/// Extract and parse the first JSON object in a model response.
///
/// Tries a ```json fence, then any fence containing a brace, then the first
/// balanced `{...}` in the raw text.
pub fn extract_json_object(response: &str) -> Result<Map<String, Value>, String> {
    let candidate = extract_json(response).ok_or_else(|| "No JSON object found in response".to_string())?;
    match serde_json::from_str::<Value>(&candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("Expected a JSON object, found {}", type_name(&other))),
        Err(e) => Err(format!("Invalid JSON: {}", e)),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn extract_json(response: &str) -> Option<String> {
    if let Some(start) = response.find("```json") {
        let after_marker = &response[start + 7..];
        if let Some(end) = after_marker.find("```") {
            return Some(after_marker[..end].trim().to_string());
        }
    }

    if let Some(start) = response.find("```") {
        let after_marker = &response[start + 3..];
        if let Some(end) = after_marker.find("```")
            && let Some(json_start) = after_marker[..end].find('{')
        {
            let content = after_marker[json_start..end].trim();
            if !content.is_empty() {
                return Some(content.to_string());
            }
        }
    }

    balanced_object(response)
}

/// First balanced `{...}` span, skipping braces inside string literals.
fn balanced_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_fenced_json() {
        let map = extract_json_object("Result:\n```json\n{\"draft\": \"x\"}\n```\nDone").unwrap();
        assert_eq!(map["draft"], "x");
    }

    #[test]
    fn extracts_generic_fence() {
        let map = extract_json_object("```\n{\"a\": 1}\n```").unwrap();
        assert_eq!(map["a"], 1);
    }

    #[test]
    fn extracts_raw_object_with_braces_in_strings() {
        let text = r#"Sure. {"draft": "Section {a} applies", "n": {"x": "}"}} trailing"#;
        let map = extract_json_object(text).unwrap();
        assert_eq!(map["draft"], "Section {a} applies");
        assert_eq!(map["n"]["x"], "}");
    }

    #[test]
    fn rejects_unbalanced_and_non_object() {
        assert!(extract_json_object("{\"a\": 1").is_err());
        assert!(extract_json_object("no json").is_err());
        let err = extract_json_object("```json\n[1, 2]\n```").unwrap_err();
        assert!(err.contains("array"));
    }
}
