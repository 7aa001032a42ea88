use crate::adaptor::normalize::{SamplingPolicy, clamp_sampling};
use crate::adaptor::{
    Adaptor, AdaptorEntry, decode_openai_chat_response, decode_openai_image_response, ensure_chat,
    openai_chat_body, openai_image_body, unsupported,
};
use crate::config::{ChannelConfig, ChannelType};
use crate::error::RelayError;
use crate::pricing::{ModelConfig, ModelPricingTable, ModelSpec, model};
use crate::relay_mode::RelayMode;
use crate::urp::{ImageRequest, ImageResponse, RelayRequest, RelayResponse};
use serde_json::Value;
use std::sync::LazyLock;

const GROK_4: ModelConfig = ModelConfig::tokens(3.0, 5.0).with_cached_input(0.75);
const GROK_3: ModelConfig = ModelConfig::tokens(3.0, 5.0).with_cached_input(0.75);
const GROK_3_MINI: ModelConfig = ModelConfig::tokens(0.3, 0.5 / 0.3).with_cached_input(0.075);
const GROK_2_IMAGE: ModelConfig = ModelConfig::image(0.07);

const MODELS: &[ModelSpec] = &[
    model("grok-4", "grok-4", GROK_4),
    model("grok-4-0709", "grok-4-0709", GROK_4),
    model("grok-3", "grok-3", GROK_3),
    model("grok-3-latest", "grok-3-latest", GROK_3),
    model("grok-3-mini", "grok-3-mini", GROK_3_MINI),
    model("grok-3-mini-latest", "grok-3-mini-latest", GROK_3_MINI),
    model("grok-2-image", "grok-2-image", GROK_2_IMAGE),
    model("grok-2-image-1212", "grok-2-image-1212", GROK_2_IMAGE),
];

static PRICING: LazyLock<ModelPricingTable> = LazyLock::new(|| ModelPricingTable::new(MODELS));

/// Reasoning models reject `stop`.
fn is_reasoning_model(model_id: &str) -> bool {
    model_id.starts_with("grok-3-mini") || model_id.starts_with("grok-4")
}

pub struct XaiAdaptor;

impl Adaptor for XaiAdaptor {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Xai
    }

    fn default_base_url(&self) -> &'static str {
        "https://api.x.ai"
    }

    fn pricing(&self) -> &ModelPricingTable {
        &PRICING
    }

    fn request_path(
        &self,
        _channel: &ChannelConfig,
        mode: RelayMode,
        _model_id: &str,
    ) -> Result<String, RelayError> {
        match mode {
            RelayMode::ChatCompletions => Ok("/v1/chat/completions".to_string()),
            RelayMode::ImagesGenerations => Ok("/v1/images/generations".to_string()),
            other => Err(unsupported(self.channel_type(), other)),
        }
    }

    fn convert_request(
        &self,
        _channel: &ChannelConfig,
        mode: RelayMode,
        req: &RelayRequest,
    ) -> Result<Value, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        let model_id = self.model_id(&req.model)?;
        let stop = if is_reasoning_model(model_id) {
            Vec::new()
        } else {
            req.stop.sequences()
        };
        let sampling = clamp_sampling(req, SamplingPolicy::Passthrough);
        Ok(openai_chat_body(model_id, req, sampling, stop))
    }

    fn convert_response(
        &self,
        _channel: &ChannelConfig,
        mode: RelayMode,
        body: &Value,
    ) -> Result<RelayResponse, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        decode_openai_chat_response(body)
    }

    fn convert_image_request(
        &self,
        _channel: &ChannelConfig,
        req: &ImageRequest,
    ) -> Result<Value, RelayError> {
        let model_id = self.model_id(&req.model)?;
        // xAI has no size parameter.
        Ok(openai_image_body(model_id, req, false))
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
    factory: || Box::new(XaiAdaptor),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelPatterns;
    use crate::urp::{FinishReason, Message, Role, Stop};
    use serde_json::json;

    fn channel() -> ChannelConfig {
        ChannelConfig {
            id: "xai".to_string(),
            channel_type: ChannelType::Xai,
            base_url: None,
            api_key: "xai-key".to_string(),
            api_format: None,
            models: ModelPatterns::default(),
        }
    }

    fn request(model: &str) -> RelayRequest {
        RelayRequest {
            model: model.to_string(),
            messages: vec![Message::text(Role::User, "hello")],
            temperature: Some(0.2),
            top_p: None,
            max_tokens: None,
            stop: Stop::Single("STOP".to_string()),
            stream: false,
        }
    }

    #[test]
    fn reasoning_models_drop_stop() {
        let body = XaiAdaptor
            .convert_request(&channel(), RelayMode::ChatCompletions, &request("grok-3-mini"))
            .unwrap();
        assert!(body.get("stop").is_none());
        assert_eq!(body["temperature"], 0.2);

        let body = XaiAdaptor
            .convert_request(&channel(), RelayMode::ChatCompletions, &request("grok-3"))
            .unwrap();
        assert_eq!(body["stop"], json!(["STOP"]));
        assert!(body.get("top_p").is_none());
    }

    #[test]
    fn decodes_usage_with_cached_tokens() {
        let body = json!({
            "id": "x-1",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {"role": "assistant", "content": "hi", "reasoning_content": "r"}
            }],
            "usage": {
                "prompt_tokens": 100,
                "completion_tokens": 20,
                "prompt_tokens_details": {"cached_tokens": 64}
            }
        });
        let resp = XaiAdaptor
            .convert_response(&channel(), RelayMode::ChatCompletions, &body)
            .unwrap();
        assert_eq!(resp.finish_reason, FinishReason::Stop);
        assert_eq!(resp.usage.cached_tokens, 64);
        assert_eq!(resp.reasoning_content.as_deref(), Some("r"));
    }

    #[test]
    fn image_request_drops_size_and_counts_images() {
        let req = ImageRequest {
            model: "grok-2-image".to_string(),
            prompt: "a cat".to_string(),
            n: Some(2),
            size: Some("1024x1024".to_string()),
            response_format: None,
        };
        let body = XaiAdaptor.convert_image_request(&channel(), &req).unwrap();
        assert!(body.get("size").is_none());
        assert_eq!(body["n"], 2);

        let resp = XaiAdaptor
            .convert_image_response(
                &channel(),
                &json!({"data": [{"url": "u1"}, {"url": "u2"}]}),
            )
            .unwrap();
        assert_eq!(resp.usage.image_count, 2);
        let charge = XaiAdaptor.pricing().price("grok-2-image", &resp.usage).unwrap();
        assert_eq!(charge.total_nano_usd, 140_000_000);
    }
}
