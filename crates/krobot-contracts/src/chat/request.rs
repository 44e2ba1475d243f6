use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Body of one chat completion call. Built once per round and not mutated
/// afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    pub stream: bool,
    pub messages: Vec<ChatMessage>,
    pub refs: Vec<i64>,
    #[serde(rename = "agentlink", default)]
    pub agent_link: BTreeMap<String, String>,
}

impl ChatRequest {
    pub fn streaming(chat_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            chat_id: chat_id.into(),
            stream: true,
            messages,
            refs: Vec::new(),
            agent_link: BTreeMap::new(),
        }
    }

    pub fn with_refs(mut self, refs: Vec<i64>) -> Self {
        self.refs = refs;
        self
    }

    pub fn with_agent_link(mut self, agent_link: BTreeMap<String, String>) -> Self {
        self.agent_link = agent_link;
        self
    }
}

/// Parses agent-link metadata from JSON text. Anything other than a JSON
/// object yields an empty map; non-string values are kept in their JSON form.
pub fn parse_agent_link(text: &str) -> BTreeMap<String, String> {
    if text.trim().is_empty() {
        return BTreeMap::new();
    }
    serde_json::from_str::<Value>(text)
        .map(agent_link_from_value)
        .unwrap_or_default()
}

/// Agent-link metadata from a config value: an object, or a string holding
/// the JSON text of one.
pub fn agent_link_from_value(value: Value) -> BTreeMap<String, String> {
    let map = match value {
        Value::Object(map) => map,
        Value::String(text) => return parse_agent_link(&text),
        _ => return BTreeMap::new(),
    };
    map.into_iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            (key, text)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{agent_link_from_value, parse_agent_link, ChatMessage, ChatRequest};

    #[test]
    fn serializes_wire_field_names() -> anyhow::Result<()> {
        let request = ChatRequest::streaming("abc123", vec![ChatMessage::user("你好")])
            .with_refs(vec![23, 24])
            .with_agent_link(parse_agent_link(r#"{"key1":"value1"}"#));
        let value: Value = serde_json::to_value(&request)?;
        assert_eq!(
            value,
            json!({
                "chatId": "abc123",
                "stream": true,
                "messages": [{"role": "user", "content": "你好"}],
                "refs": [23, 24],
                "agentlink": {"key1": "value1"},
            })
        );
        Ok(())
    }

    #[test]
    fn empty_agent_link_is_sent_as_empty_object() -> anyhow::Result<()> {
        let request = ChatRequest::streaming("abc", Vec::new());
        let value: Value = serde_json::to_value(&request)?;
        assert_eq!(value["agentlink"], json!({}));
        assert_eq!(value["messages"], json!([]));
        Ok(())
    }

    #[test]
    fn agent_link_parsing_tolerates_bad_input() {
        assert!(parse_agent_link("").is_empty());
        assert!(parse_agent_link("not json").is_empty());
        assert!(parse_agent_link("[1,2]").is_empty());
        let parsed = parse_agent_link(r#"{"a":"x","b":2}"#);
        assert_eq!(parsed.get("a").map(String::as_str), Some("x"));
        assert_eq!(parsed.get("b").map(String::as_str), Some("2"));
    }

    #[test]
    fn agent_link_value_accepts_object_or_json_text() {
        let from_object = agent_link_from_value(json!({"key1": "value1"}));
        let from_text = agent_link_from_value(json!(r#"{"key1":"value1"}"#));
        assert_eq!(from_object, from_text);
        assert_eq!(from_object.get("key1").map(String::as_str), Some("value1"));
        assert!(agent_link_from_value(json!("{broken")).is_empty());
        assert!(agent_link_from_value(json!(42)).is_empty());
    }
}
