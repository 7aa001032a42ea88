use crate::adaptor::normalize::{SamplingPolicy, clamp_sampling, normalize_finish_reason};
use crate::adaptor::{
    Adaptor, AdaptorEntry, check_error_envelope, decode_openai_chat_response,
    decode_openai_image_response, encode_messages, ensure_chat, insert_opt, openai_chat_body,
    openai_image_body, str_at, u64_at, unsupported,
};
use crate::config::{ChannelApiFormat, ChannelConfig, ChannelType};
use crate::error::RelayError;
use crate::pricing::{ModelConfig, ModelPricingTable, ModelSpec, model};
use crate::relay_mode::RelayMode;
use crate::urp::{FinishReason, ImageRequest, ImageResponse, RelayRequest, RelayResponse, Usage};
use serde_json::{Map, Value};
use std::sync::LazyLock;

const GPT_4O: ModelConfig = ModelConfig::tokens(2.5, 4.0).with_cached_input(1.25);
const GPT_4O_MINI: ModelConfig = ModelConfig::tokens(0.15, 4.0).with_cached_input(0.075);
const GPT_41: ModelConfig = ModelConfig::tokens(2.0, 4.0).with_cached_input(0.5);
const GPT_41_MINI: ModelConfig = ModelConfig::tokens(0.4, 4.0).with_cached_input(0.1);
const O3_MINI: ModelConfig = ModelConfig::tokens(1.1, 4.0).with_cached_input(0.55);
const DALL_E_3: ModelConfig = ModelConfig::image(0.04);

const MODELS: &[ModelSpec] = &[
    model("gpt-4o", "gpt-4o", GPT_4O),
    model("gpt-4o-2024-08-06", "gpt-4o-2024-08-06", GPT_4O),
    model("gpt-4o-mini", "gpt-4o-mini", GPT_4O_MINI),
    model("gpt-4o-mini-2024-07-18", "gpt-4o-mini-2024-07-18", GPT_4O_MINI),
    model("gpt-4.1", "gpt-4.1", GPT_41),
    model("gpt-4.1-mini", "gpt-4.1-mini", GPT_41_MINI),
    model("o3-mini", "o3-mini", O3_MINI),
    model("dall-e-3", "dall-e-3", DALL_E_3),
];

static PRICING: LazyLock<ModelPricingTable> = LazyLock::new(|| ModelPricingTable::new(MODELS));

pub struct OpenAiAdaptor;

fn responses_body(model_id: &str, req: &RelayRequest) -> Value {
    let sampling = clamp_sampling(req, SamplingPolicy::Passthrough);
    let mut obj = Map::new();
    obj.insert("model".to_string(), Value::String(model_id.to_string()));
    obj.insert(
        "input".to_string(),
        Value::Array(encode_messages(&req.messages)),
    );
    insert_opt(&mut obj, "temperature", sampling.temperature);
    insert_opt(&mut obj, "top_p", sampling.top_p);
    insert_opt(&mut obj, "max_output_tokens", req.max_tokens);
    Value::Object(obj)
}

fn decode_responses(body: &Value) -> Result<RelayResponse, RelayError> {
    check_error_envelope(body)?;
    let output = body
        .get("output")
        .and_then(Value::as_array)
        .ok_or_else(|| RelayError::UpstreamResponse("missing output".to_string()))?;

    let mut content = String::new();
    let mut reasoning = String::new();
    for item in output {
        match str_at(item, "/type") {
            Some("message") => {
                for part in item
                    .get("content")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    if str_at(part, "/type") == Some("output_text") {
                        content.push_str(str_at(part, "/text").unwrap_or_default());
                    }
                }
            }
            Some("reasoning") => {
                for part in item
                    .get("summary")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                {
                    reasoning.push_str(str_at(part, "/text").unwrap_or_default());
                }
            }
            _ => {}
        }
    }

    let finish_reason = if str_at(body, "/status") == Some("incomplete") {
        normalize_finish_reason(str_at(body, "/incomplete_details/reason"))
    } else {
        FinishReason::Stop
    };

    Ok(RelayResponse {
        id: str_at(body, "/id").map(str::to_string),
        content,
        reasoning_content: (!reasoning.is_empty()).then_some(reasoning),
        finish_reason,
        usage: Usage {
            prompt_tokens: u64_at(body, "/usage/input_tokens"),
            completion_tokens: u64_at(body, "/usage/output_tokens"),
            cached_tokens: u64_at(body, "/usage/input_tokens_details/cached_tokens"),
            image_count: 0,
        },
    })
}

impl Adaptor for OpenAiAdaptor {
    fn channel_type(&self) -> ChannelType {
        ChannelType::OpenaiCompatible
    }

    fn default_base_url(&self) -> &'static str {
        "https://api.openai.com"
    }

    fn pricing(&self) -> &ModelPricingTable {
        &PRICING
    }

    fn request_path(
        &self,
        channel: &ChannelConfig,
        mode: RelayMode,
        _model_id: &str,
    ) -> Result<String, RelayError> {
        match (mode, channel.api_format()) {
            (RelayMode::ChatCompletions, ChannelApiFormat::ChatCompletion) => {
                Ok("/v1/chat/completions".to_string())
            }
            (RelayMode::ChatCompletions, ChannelApiFormat::Response) => {
                Ok("/v1/responses".to_string())
            }
            (RelayMode::ImagesGenerations, _) => Ok("/v1/images/generations".to_string()),
            (other, _) => Err(unsupported(self.channel_type(), other)),
        }
    }

    fn convert_request(
        &self,
        channel: &ChannelConfig,
        mode: RelayMode,
        req: &RelayRequest,
    ) -> Result<Value, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        let model_id = self.model_id(&req.model)?;
        match channel.api_format() {
            ChannelApiFormat::ChatCompletion => {
                let sampling = clamp_sampling(req, SamplingPolicy::Passthrough);
                Ok(openai_chat_body(model_id, req, sampling, req.stop.sequences()))
            }
            ChannelApiFormat::Response => Ok(responses_body(model_id, req)),
        }
    }

    fn convert_response(
        &self,
        channel: &ChannelConfig,
        mode: RelayMode,
        body: &Value,
    ) -> Result<RelayResponse, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        match channel.api_format() {
            ChannelApiFormat::ChatCompletion => decode_openai_chat_response(body),
            ChannelApiFormat::Response => decode_responses(body),
        }
    }

    fn convert_image_request(
        &self,
        _channel: &ChannelConfig,
        req: &ImageRequest,
    ) -> Result<Value, RelayError> {
        let model_id = self.model_id(&req.model)?;
        Ok(openai_image_body(model_id, req, true))
    }

    fn convert_image_response(
        &self,
        _channel: &ChannelConfig,
        body: &Value,
    ) -> Result<ImageResponse, RelayError> {
        decode_openai_image_response(body)
    }
}

inventory::submit!(AdaptorEntry {
    factory: || Box::new(OpenAiAdaptor),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelPatterns;
    use crate::urp::{Message, Role, Stop};
    use serde_json::json;

    fn channel(api_format: Option<&str>) -> ChannelConfig {
        ChannelConfig {
            id: "openai".to_string(),
            channel_type: ChannelType::OpenaiCompatible,
            base_url: Some("https://gateway.example.com/v1".to_string()),
            api_key: "sk-test".to_string(),
            api_format: api_format.map(str::to_string),
            models: ModelPatterns::default(),
        }
    }

    fn request() -> RelayRequest {
        RelayRequest {
            model: "gpt-4o-mini".to_string(),
            messages: vec![
                Message::text(Role::Developer, "be brief"),
                Message::text(Role::User, "hi"),
            ],
            temperature: Some(1.7),
            top_p: None,
            max_tokens: Some(64),
            stop: Stop::Single("\n\n".to_string()),
            stream: false,
        }
    }

    #[test]
    fn api_format_selects_path() {
        let chat = channel(None);
        let responses = channel(Some("  Responses "));
        assert_eq!(
            OpenAiAdaptor
                .request_path(&chat, RelayMode::ChatCompletions, "gpt-4o")
                .unwrap(),
            "/v1/chat/completions"
        );
        assert_eq!(
            OpenAiAdaptor
                .request_path(&responses, RelayMode::ChatCompletions, "gpt-4o")
                .unwrap(),
            "/v1/responses"
        );
        assert_eq!(
            OpenAiAdaptor
                .request_path(&channel(Some("bogus")), RelayMode::ChatCompletions, "gpt-4o")
                .unwrap(),
            "/v1/chat/completions"
        );
    }

    #[test]
    fn chat_body_passes_sampling_through() {
        let body = OpenAiAdaptor
            .convert_request(&channel(None), RelayMode::ChatCompletions, &request())
            .unwrap();
        assert_eq!(body["temperature"], 1.7);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stop"], json!(["\n\n"]));
        assert_eq!(body["messages"][0]["role"], "developer");
    }

    #[test]
    fn responses_body_uses_input_and_max_output_tokens() {
        let body = OpenAiAdaptor
            .convert_request(
                &channel(Some("response")),
                RelayMode::ChatCompletions,
                &request(),
            )
            .unwrap();
        assert_eq!(body["input"][1]["content"], "hi");
        assert_eq!(body["max_output_tokens"], 64);
        assert!(body.get("messages").is_none());
        assert!(body.get("stop").is_none());
    }

    #[test]
    fn decodes_incomplete_responses_output() {
        let body = json!({
            "id": "resp_1",
            "status": "incomplete",
            "incomplete_details": {"reason": "max_output_tokens"},
            "output": [
                {"type": "reasoning", "summary": [{"type": "summary_text", "text": "think"}]},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "part one"},
                    {"type": "output_text", "text": " two"}
                ]}
            ],
            "usage": {
                "input_tokens": 40,
                "output_tokens": 64,
                "input_tokens_details": {"cached_tokens": 32}
            }
        });
        let resp = OpenAiAdaptor
            .convert_response(&channel(Some("response")), RelayMode::ChatCompletions, &body)
            .unwrap();
        assert_eq!(resp.content, "part one two");
        assert_eq!(resp.reasoning_content.as_deref(), Some("think"));
        assert_eq!(resp.finish_reason, FinishReason::Length);
        assert_eq!(resp.usage.cached_tokens, 32);
    }

    #[test]
    fn completed_responses_finish_with_stop() {
        let body = json!({
            "status": "completed",
            "output": [{"type": "message", "content": [{"type": "output_text", "text": "ok"}]}],
            "usage": {"input_tokens": 3, "output_tokens": 1}
        });
        let resp = OpenAiAdaptor
            .convert_response(&channel(Some("response")), RelayMode::ChatCompletions, &body)
            .unwrap();
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert!(resp.reasoning_content.is_none());
    }

    #[test]
    fn embeddings_are_not_relayed() {
        assert!(matches!(
            OpenAiAdaptor.request_path(&channel(None), RelayMode::Embeddings, "gpt-4o"),
            Err(RelayError::UnsupportedOperation { .. })
        ));
    }
}
