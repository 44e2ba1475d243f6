use serde_json::Value;

/// Extracts the incremental text carried by one stream payload.
///
/// Payloads that are not JSON, or JSON without a usable `choices` array,
/// carry no fragment. Each choice contributes its `delta.content`, or its
/// `message.content` when there is no delta content; contributions are
/// concatenated in array order. An empty result is reported as `None`.
pub fn extract_delta(payload: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(payload.trim()).ok()?;
    let choices = parsed.get("choices")?.as_array()?;

    let mut fragment = String::new();
    for choice in choices {
        let content = content_at(choice, "delta").or_else(|| content_at(choice, "message"));
        if let Some(text) = content {
            fragment.push_str(&text);
        }
    }
    if fragment.is_empty() {
        None
    } else {
        Some(fragment)
    }
}

fn content_at(choice: &Value, field: &str) -> Option<String> {
    match choice.get(field)?.get("content")? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        Value::Array(_) | Value::Object(_) => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::extract_delta;

    #[test]
    fn reads_delta_content() {
        assert_eq!(
            extract_delta(r#"{"choices":[{"delta":{"content":"您好"}}]}"#),
            Some("您好".to_string())
        );
    }

    #[test]
    fn falls_back_to_message_content() {
        assert_eq!(
            extract_delta(r#"{"choices":[{"message":{"role":"assistant","content":"full"}}]}"#),
            Some("full".to_string())
        );
    }

    #[test]
    fn prefers_delta_over_message_within_a_choice() {
        assert_eq!(
            extract_delta(
                r#"{"choices":[{"delta":{"content":"d"},"message":{"content":"m"}}]}"#
            ),
            Some("d".to_string())
        );
    }

    #[test]
    fn concatenates_choices_in_order() {
        assert_eq!(
            extract_delta(
                r#"{"choices":[{"delta":{"content":"A"}},{"message":{"content":"B"}},{"delta":{}}]}"#
            ),
            Some("AB".to_string())
        );
    }

    #[test]
    fn null_and_empty_content_yield_nothing() {
        assert_eq!(extract_delta(r#"{"choices":[{"delta":{"content":null}}]}"#), None);
        assert_eq!(extract_delta(r#"{"choices":[{"delta":{"content":""}}]}"#), None);
        assert_eq!(extract_delta(r#"{"choices":[]}"#), None);
        assert_eq!(extract_delta(r#"{"id":"x"}"#), None);
    }

    #[test]
    fn non_json_lines_are_skipped() {
        assert_eq!(extract_delta("plain text"), None);
        assert_eq!(extract_delta("[DONE]"), None);
        assert_eq!(extract_delta(r#"{"choices":[{"delta":"#), None);
    }
}
