use crate::adaptor::normalize::parse_stop;
use crate::error::RelayError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Canonical chat request every adaptor translates from.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub max_tokens: Option<u64>,
    pub stop: Stop,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
    Tool,
    Function,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
            Role::Function => "function",
        }
    }
}

/// The `stop` field after parsing; never a bare JSON value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Stop {
    #[default]
    Absent,
    Single(String),
    Many(Vec<String>),
}

impl Stop {
    pub fn sequences(&self) -> Vec<String> {
        match self {
            Stop::Absent => Vec::new(),
            Stop::Single(s) => vec![s.clone()],
            Stop::Many(items) => items.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionBody {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    top_p: Option<f64>,
    #[serde(default)]
    max_tokens: Option<u64>,
    #[serde(default)]
    max_completion_tokens: Option<u64>,
    #[serde(default)]
    stop: Value,
    #[serde(default)]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Value,
}

impl RelayRequest {
    pub fn from_value(value: &Value) -> Result<Self, RelayError> {
        let body = ChatCompletionBody::deserialize(value)
            .map_err(|err| RelayError::InvalidRequest(err.to_string()))?;
        let stop = parse_stop(&body.stop)?;
        Ok(Self {
            model: body.model,
            messages: body
                .messages
                .into_iter()
                .map(|m| Message::text(m.role, value_to_text(&m.content)))
                .collect(),
            temperature: body.temperature,
            top_p: body.top_p,
            max_tokens: body.max_tokens.or(body.max_completion_tokens),
            stop,
            stream: body.stream.unwrap_or(false),
        })
    }
}

pub fn value_to_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => {
            let mut out = String::new();
            for item in items {
                if let Some(s) = item.as_str() {
                    out.push_str(s);
                } else if let Some(text) = item.get("text").and_then(|x| x.as_str()) {
                    out.push_str(text);
                }
            }
            out
        }
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
}

impl FinishReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
        }
    }
}

/// Unit counts reported by an adaptor. `prompt_tokens` includes `cached_tokens`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cached_tokens: u64,
    pub image_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub id: Option<String>,
    pub content: String,
    pub reasoning_content: Option<String>,
    pub finish_reason: FinishReason,
    pub usage: Usage,
}

impl RelayResponse {
    pub fn to_chat_completion(&self, model: &str) -> Value {
        let mut message = json!({
            "role": "assistant",
            "content": self.content,
        });
        if let Some(reasoning) = &self.reasoning_content {
            message["reasoning_content"] = Value::String(reasoning.clone());
        }
        let id = self
            .id
            .clone()
            .unwrap_or_else(|| format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()));
        json!({
            "id": id,
            "object": "chat.completion",
            "created": chrono::Utc::now().timestamp(),
            "model": model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": self.finish_reason.as_str(),
            }],
            "usage": {
                "prompt_tokens": self.usage.prompt_tokens,
                "completion_tokens": self.usage.completion_tokens,
                "total_tokens": self.usage.prompt_tokens + self.usage.completion_tokens,
                "prompt_tokens_details": {
                    "cached_tokens": self.usage.cached_tokens
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    #[serde(default)]
    pub n: Option<u32>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub response_format: Option<String>,
}

impl ImageRequest {
    pub fn from_value(value: &Value) -> Result<Self, RelayError> {
        Self::deserialize(value).map_err(|err| RelayError::InvalidRequest(err.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageResponse {
    pub created: i64,
    pub data: Vec<Value>,
    pub usage: Usage,
}

impl ImageResponse {
    /// Builds a response whose billed image count is the number of returned items.
    pub fn from_items(created: Option<i64>, data: Vec<Value>) -> Self {
        let usage = Usage {
            image_count: data.len() as u64,
            ..Usage::default()
        };
        Self {
            created: created.unwrap_or_else(|| chrono::Utc::now().timestamp()),
            data,
            usage,
        }
    }

    pub fn to_openai(&self) -> Value {
        json!({
            "created": self.created,
            "data": self.data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_value_keeps_message_order_and_roles() {
        let value = json!({
            "model": "qwen-plus",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": [{"type": "text", "text": "hi"}, {"type": "text", "text": " there"}]},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": "again"}
            ],
            "stop": "STOP"
        });
        let req = RelayRequest::from_value(&value).expect("decode");
        let roles: Vec<Role> = req.messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User]
        );
        assert_eq!(req.messages[1].content, "hi there");
        assert_eq!(req.stop, Stop::Single("STOP".to_string()));
        assert!(!req.stream);
    }

    #[test]
    fn legacy_function_role_is_preserved() {
        let value = json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "function", "content": "{\"temp\": 21}"}
            ]
        });
        let req = RelayRequest::from_value(&value).expect("decode");
        assert_eq!(req.messages[1].role, Role::Function);
        assert_eq!(req.messages[1].role.as_str(), "function");
    }

    #[test]
    fn from_value_accepts_max_completion_tokens() {
        let value = json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "x"}],
            "max_completion_tokens": 64
        });
        let req = RelayRequest::from_value(&value).expect("decode");
        assert_eq!(req.max_tokens, Some(64));
        assert_eq!(req.stop, Stop::Absent);
    }

    #[test]
    fn from_value_rejects_unknown_role() {
        let value = json!({
            "model": "gpt-4o",
            "messages": [{"role": "narrator", "content": "x"}]
        });
        let err = RelayRequest::from_value(&value).unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
    }

    #[test]
    fn chat_completion_reports_total_tokens() {
        let resp = RelayResponse {
            id: Some("abc".to_string()),
            content: "ok".to_string(),
            reasoning_content: None,
            finish_reason: FinishReason::Length,
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                cached_tokens: 4,
                image_count: 0,
            },
        };
        let body = resp.to_chat_completion("qwen-plus");
        assert_eq!(body["id"], "abc");
        assert_eq!(body["choices"][0]["finish_reason"], "length");
        assert_eq!(body["usage"]["total_tokens"], 15);
        assert_eq!(body["usage"]["prompt_tokens_details"]["cached_tokens"], 4);
        assert!(body["choices"][0]["message"].get("reasoning_content").is_none());
    }

    #[test]
    fn image_response_counts_items() {
        let resp = ImageResponse::from_items(Some(7), vec![json!({"url": "a"}), json!({"url": "b"})]);
        assert_eq!(resp.usage.image_count, 2);
        assert_eq!(resp.to_openai()["created"], 7);
    }
}
