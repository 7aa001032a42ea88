use crate::adaptor::normalize::{SamplingPolicy, clamp_sampling};
use crate::adaptor::{
    Adaptor, AdaptorEntry, decode_openai_chat_response, decode_openai_image_response,
    encode_messages, ensure_chat, insert_opt, openai_chat_body, openai_image_body, str_at,
    u64_at, unsupported,
};
use crate::config::{ChannelConfig, ChannelType};
use crate::error::RelayError;
use crate::pricing::{ModelConfig, ModelPricingTable, ModelSpec, model};
use crate::relay_mode::RelayMode;
use crate::urp::{FinishReason, ImageRequest, ImageResponse, RelayRequest, RelayResponse, Usage};
use serde_json::{Map, Value};
use std::sync::LazyLock;

const GLM_45: ModelConfig = ModelConfig::tokens(0.6, 2.2 / 0.6).with_cached_input(0.11);
const GLM_4_PLUS: ModelConfig = ModelConfig::tokens(0.7, 1.0);
const GLM_4: ModelConfig = ModelConfig::tokens(1.4, 1.0);
const GLM_4_AIR: ModelConfig = ModelConfig::tokens(0.07, 1.0);
const GLM_4_FLASH: ModelConfig = ModelConfig::tokens(0.0, 1.0);
const CHATGLM_PRO: ModelConfig = ModelConfig::tokens(1.4, 1.0);
const CHATGLM_STD: ModelConfig = ModelConfig::tokens(0.7, 1.0);
const CHATGLM_LITE: ModelConfig = ModelConfig::tokens(0.28, 1.0);
const COGVIEW_3: ModelConfig = ModelConfig::image(0.035);

const MODELS: &[ModelSpec] = &[
    model("glm-4.5", "glm-4.5", GLM_45),
    model("glm-4-plus", "glm-4-plus", GLM_4_PLUS),
    model("glm-4", "glm-4", GLM_4),
    model("glm-4-air", "glm-4-air", GLM_4_AIR),
    model("glm-4-flash", "glm-4-flash", GLM_4_FLASH),
    model("chatglm_turbo", "chatglm_turbo", CHATGLM_STD),
    model("chatglm-turbo", "chatglm_turbo", CHATGLM_STD),
    model("chatglm_pro", "chatglm_pro", CHATGLM_PRO),
    model("chatglm_std", "chatglm_std", CHATGLM_STD),
    model("chatglm_lite", "chatglm_lite", CHATGLM_LITE),
    model("cogview-3", "cogview-3", COGVIEW_3),
];

static PRICING: LazyLock<ModelPricingTable> = LazyLock::new(|| ModelPricingTable::new(MODELS));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V3,
    V4,
}

impl ApiVersion {
    pub fn for_model_id(model_id: &str) -> Self {
        if model_id.starts_with("chatglm") {
            ApiVersion::V3
        } else {
            ApiVersion::V4
        }
    }
}

pub struct ZhipuAdaptor;

impl ZhipuAdaptor {
    /// V3 addresses the model in the path and has no stop parameter.
    fn convert_v3_request(req: &RelayRequest) -> Value {
        let sampling = clamp_sampling(req, SamplingPolicy::UnitInterval);
        let mut obj = Map::new();
        obj.insert(
            "prompt".to_string(),
            Value::Array(encode_messages(&req.messages)),
        );
        insert_opt(&mut obj, "temperature", sampling.temperature);
        insert_opt(&mut obj, "top_p", sampling.top_p);
        obj.insert("incremental".to_string(), Value::Bool(false));
        Value::Object(obj)
    }

    fn convert_v3_response(body: &Value) -> Result<RelayResponse, RelayError> {
        if body.get("success").and_then(Value::as_bool) != Some(true) {
            let message = str_at(body, "/msg").unwrap_or("zhipu v3 request failed");
            return Err(RelayError::UpstreamResponse(message.to_string()));
        }
        let data = body
            .get("data")
            .ok_or_else(|| RelayError::UpstreamResponse("missing data".to_string()))?;
        let raw = str_at(data, "/choices/0/content").unwrap_or_default();
        // V3 wraps content in a JSON string literal.
        let content = serde_json::from_str::<String>(raw).unwrap_or_else(|_| raw.to_string());
        Ok(RelayResponse {
            id: str_at(data, "/request_id")
                .or_else(|| str_at(data, "/task_id"))
                .map(str::to_string),
            content,
            reasoning_content: None,
            finish_reason: FinishReason::Stop,
            usage: Usage {
                prompt_tokens: u64_at(data, "/usage/prompt_tokens"),
                completion_tokens: u64_at(data, "/usage/completion_tokens"),
                cached_tokens: 0,
                image_count: 0,
            },
        })
    }
}

impl Adaptor for ZhipuAdaptor {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Zhipu
    }

    fn default_base_url(&self) -> &'static str {
        "https://open.bigmodel.cn"
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
        match (mode, ApiVersion::for_model_id(model_id)) {
            (RelayMode::ChatCompletions, ApiVersion::V3) => {
                Ok(format!("/api/paas/v3/model-api/{model_id}/invoke"))
            }
            (RelayMode::ChatCompletions, ApiVersion::V4) => {
                Ok("/api/paas/v4/chat/completions".to_string())
            }
            (RelayMode::ImagesGenerations, ApiVersion::V4) => {
                Ok("/api/paas/v4/images/generations".to_string())
            }
            (other, _) => Err(unsupported(self.channel_type(), other)),
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
        match ApiVersion::for_model_id(model_id) {
            ApiVersion::V3 => Ok(Self::convert_v3_request(req)),
            ApiVersion::V4 => {
                let sampling = clamp_sampling(req, SamplingPolicy::PositiveTopP);
                Ok(openai_chat_body(model_id, req, sampling, req.stop.sequences()))
            }
        }
    }

    fn convert_response(
        &self,
        _channel: &ChannelConfig,
        mode: RelayMode,
        body: &Value,
    ) -> Result<RelayResponse, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        if body.get("success").is_some() && body.get("data").is_some() {
            Self::convert_v3_response(body)
        } else {
            decode_openai_chat_response(body)
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
    factory: || Box::new(ZhipuAdaptor),
});
