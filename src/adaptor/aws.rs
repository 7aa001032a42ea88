use crate::adaptor::normalize::{SamplingPolicy, clamp_sampling, normalize_finish_reason};
use crate::adaptor::{
    Adaptor, AdaptorEntry, check_error_envelope, ensure_chat, openai_chat_body, str_at, u64_at,
};
use crate::config::{ChannelConfig, ChannelType};
use crate::error::RelayError;
use crate::pricing::{ModelConfig, ModelPricingTable, ModelSpec, model};
use crate::relay_mode::RelayMode;
use crate::urp::{RelayRequest, RelayResponse, Usage};
use serde_json::Value;
use std::sync::LazyLock;

const DEEPSEEK_R1: ModelConfig = ModelConfig::tokens(1.35, 4.0);
const DEEPSEEK_V3: ModelConfig = ModelConfig::tokens(0.58, 1.68 / 0.58);

const MODELS: &[ModelSpec] = &[
    model("deepseek-r1", "us.deepseek.r1-v1:0", DEEPSEEK_R1),
    model("deepseek-reasoner", "us.deepseek.r1-v1:0", DEEPSEEK_R1),
    model("deepseek-v3", "deepseek.v3-v1:0", DEEPSEEK_V3),
    model("deepseek-chat", "deepseek.v3-v1:0", DEEPSEEK_V3),
];

static PRICING: LazyLock<ModelPricingTable> = LazyLock::new(|| ModelPricingTable::new(MODELS));

pub struct AwsAdaptor;

impl Adaptor for AwsAdaptor {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Aws
    }

    fn default_base_url(&self) -> &'static str {
        "https://bedrock-runtime.us-east-1.amazonaws.com"
    }

    fn pricing(&self) -> &ModelPricingTable {
        &PRICING
    }

    fn request_path(
        &self,
        _channel: &ChannelConfig,
        mode: RelayMode,
        model_id: &str,
    ) -> Result<String, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        Ok(format!("/model/{model_id}/invoke"))
    }

    fn convert_request(
        &self,
        _channel: &ChannelConfig,
        mode: RelayMode,
        req: &RelayRequest,
    ) -> Result<Value, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        let model_id = self.model_id(&req.model)?;
        let sampling = clamp_sampling(req, SamplingPolicy::UnitInterval);
        let mut body = openai_chat_body(model_id, req, sampling, req.stop.sequences());
        // The model is addressed by the invoke path, not the body.
        if let Some(obj) = body.as_object_mut() {
            obj.remove("model");
        }
        Ok(body)
    }

    fn convert_response(
        &self,
        _channel: &ChannelConfig,
        mode: RelayMode,
        body: &Value,
    ) -> Result<RelayResponse, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        check_error_envelope(body)?;
        let choice = body
            .pointer("/choices/0")
            .ok_or_else(|| RelayError::UpstreamResponse("missing choices".to_string()))?;
        let finish = str_at(choice, "/stop_reason").or_else(|| str_at(choice, "/finish_reason"));
        Ok(RelayResponse {
            id: str_at(body, "/id").map(str::to_string),
            content: str_at(choice, "/message/content")
                .or_else(|| str_at(choice, "/text"))
                .unwrap_or_default()
                .to_string(),
            reasoning_content: str_at(choice, "/message/reasoning_content")
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            finish_reason: normalize_finish_reason(finish),
            usage: Usage {
                prompt_tokens: u64_at(body, "/usage/prompt_tokens"),
                completion_tokens: u64_at(body, "/usage/completion_tokens"),
                cached_tokens: 0,
                image_count: 0,
            },
        })
    }
}

inventory::submit!(AdaptorEntry {
    factory: || Box::new(AwsAdaptor),
});
