use crate::adaptor::normalize::{Sampling, normalize_finish_reason};
use crate::config::{ChannelConfig, ChannelType};
use crate::error::RelayError;
use crate::pricing::ModelPricingTable;
use crate::relay_mode::RelayMode;
use crate::urp::{ImageRequest, ImageResponse, Message, RelayRequest, RelayResponse, Usage};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

pub mod ali;
pub mod aws;
pub mod normalize;
pub mod openai;
pub mod xai;
pub mod zhipu;

/// Translator between the canonical shapes and one vendor family's wire format.
///
/// Adaptors only build and read payloads; sending them is the caller's job.
pub trait Adaptor: Send + Sync + 'static {
    fn channel_type(&self) -> ChannelType;

    fn default_base_url(&self) -> &'static str;

    /// Static table used both for vendor model ids and for pricing.
    fn pricing(&self) -> &ModelPricingTable;

    fn model_id(&self, model: &str) -> Result<&'static str, RelayError> {
        self.pricing().vendor_id(model)
    }

    fn request_path(
        &self,
        channel: &ChannelConfig,
        mode: RelayMode,
        model_id: &str,
    ) -> Result<String, RelayError>;

    fn convert_request(
        &self,
        channel: &ChannelConfig,
        mode: RelayMode,
        req: &RelayRequest,
    ) -> Result<Value, RelayError>;

    fn convert_response(
        &self,
        channel: &ChannelConfig,
        mode: RelayMode,
        body: &Value,
    ) -> Result<RelayResponse, RelayError>;

    fn convert_image_request(
        &self,
        _channel: &ChannelConfig,
        _req: &ImageRequest,
    ) -> Result<Value, RelayError> {
        Err(unsupported(self.channel_type(), RelayMode::ImagesGenerations))
    }

    fn convert_image_response(
        &self,
        _channel: &ChannelConfig,
        _body: &Value,
    ) -> Result<ImageResponse, RelayError> {
        Err(unsupported(self.channel_type(), RelayMode::ImagesGenerations))
    }
}

pub struct AdaptorEntry {
    pub factory: fn() -> Box<dyn Adaptor>,
}

inventory::collect!(AdaptorEntry);

pub type AdaptorRegistry = HashMap<ChannelType, Arc<dyn Adaptor>>;

pub fn registry() -> AdaptorRegistry {
    let mut map = HashMap::new();
    for entry in inventory::iter::<AdaptorEntry> {
        let adaptor = (entry.factory)();
        map.insert(adaptor.channel_type(), Arc::<dyn Adaptor>::from(adaptor));
    }
    map
}

pub fn unsupported(channel_type: ChannelType, mode: RelayMode) -> RelayError {
    RelayError::UnsupportedOperation {
        channel: channel_type.as_str(),
        mode,
    }
}

pub fn ensure_chat(channel_type: ChannelType, mode: RelayMode) -> Result<(), RelayError> {
    if mode == RelayMode::ChatCompletions {
        Ok(())
    } else {
        Err(unsupported(channel_type, mode))
    }
}

/// Image-priced models only serve image generation; token-priced models only serve chat.
pub fn ensure_pricing_mode(
    adaptor: &dyn Adaptor,
    model: &str,
    mode: RelayMode,
) -> Result<(), RelayError> {
    let spec = adaptor.pricing().get(model)?;
    let fits = match mode {
        RelayMode::ChatCompletions => !spec.config.is_image(),
        RelayMode::ImagesGenerations => spec.config.is_image(),
        _ => false,
    };
    if fits {
        Ok(())
    } else {
        Err(unsupported(adaptor.channel_type(), mode))
    }
}

pub fn encode_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

pub fn insert_opt<T: Into<Value>>(obj: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        obj.insert(key.to_string(), v.into());
    }
}

pub fn insert_stop(obj: &mut Map<String, Value>, key: &str, stop: Vec<String>) {
    if !stop.is_empty() {
        obj.insert(key.to_string(), Value::from(stop));
    }
}

/// OpenAI chat-completions body; vendor-specific sampling and stop are resolved by the caller.
pub fn openai_chat_body(
    model_id: &str,
    req: &RelayRequest,
    sampling: Sampling,
    stop: Vec<String>,
) -> Value {
    let mut obj = Map::new();
    obj.insert("model".to_string(), Value::String(model_id.to_string()));
    obj.insert(
        "messages".to_string(),
        Value::Array(encode_messages(&req.messages)),
    );
    insert_opt(&mut obj, "temperature", sampling.temperature);
    insert_opt(&mut obj, "top_p", sampling.top_p);
    insert_opt(&mut obj, "max_tokens", req.max_tokens);
    insert_stop(&mut obj, "stop", stop);
    Value::Object(obj)
}

pub fn u64_at(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

pub fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

/// Surface vendor error envelopes instead of decoding them as empty replies.
pub fn check_error_envelope(body: &Value) -> Result<(), RelayError> {
    match body.get("error") {
        Some(Value::Null) | None => Ok(()),
        Some(err) => {
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            Err(RelayError::UpstreamResponse(message))
        }
    }
}

pub fn decode_openai_chat_response(body: &Value) -> Result<RelayResponse, RelayError> {
    check_error_envelope(body)?;
    let choice = body
        .pointer("/choices/0")
        .ok_or_else(|| RelayError::UpstreamResponse("missing choices".to_string()))?;
    let content = choice
        .pointer("/message/content")
        .map(crate::urp::value_to_text)
        .unwrap_or_default();
    let reasoning_content = str_at(choice, "/message/reasoning_content")
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok(RelayResponse {
        id: str_at(body, "/id").map(str::to_string),
        content,
        reasoning_content,
        finish_reason: normalize_finish_reason(str_at(choice, "/finish_reason")),
        usage: Usage {
            prompt_tokens: u64_at(body, "/usage/prompt_tokens"),
            completion_tokens: u64_at(body, "/usage/completion_tokens"),
            cached_tokens: u64_at(body, "/usage/prompt_tokens_details/cached_tokens"),
            image_count: 0,
        },
    })
}

pub fn openai_image_body(model_id: &str, req: &ImageRequest, include_size: bool) -> Value {
    let mut obj = Map::new();
    obj.insert("model".to_string(), Value::String(model_id.to_string()));
    obj.insert("prompt".to_string(), Value::String(req.prompt.clone()));
    insert_opt(&mut obj, "n", req.n);
    if include_size {
        insert_opt(&mut obj, "size", req.size.clone());
    }
    insert_opt(&mut obj, "response_format", req.response_format.clone());
    Value::Object(obj)
}

pub fn decode_openai_image_response(body: &Value) -> Result<ImageResponse, RelayError> {
    check_error_envelope(body)?;
    let data = body
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| RelayError::UpstreamResponse("missing data".to_string()))?;
    Ok(ImageResponse::from_items(
        body.get("created").and_then(Value::as_i64),
        data,
    ))
}
