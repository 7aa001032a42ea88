use crate::adaptor::normalize::{SamplingPolicy, clamp_sampling, normalize_finish_reason};
use crate::adaptor::{
    Adaptor, AdaptorEntry, check_error_envelope, encode_messages, ensure_chat, insert_opt,
    insert_stop, str_at, u64_at,
};
use crate::config::{ChannelConfig, ChannelType};
use crate::error::RelayError;
use crate::pricing::{ModelConfig, ModelPricingTable, ModelSpec, model};
use crate::relay_mode::RelayMode;
use crate::urp::{RelayRequest, RelayResponse, Usage};
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

const QWEN_MAX: ModelConfig = ModelConfig::tokens(1.6, 4.0).with_cached_input(0.64);
const QWEN_PLUS: ModelConfig = ModelConfig::tokens(0.4, 3.0).with_cached_input(0.16);
const QWEN_TURBO: ModelConfig = ModelConfig::tokens(0.05, 4.0).with_cached_input(0.02);
const QWEN3_MAX: ModelConfig = ModelConfig::tokens(1.2, 5.0).with_cached_input(0.24);
const QWEN_LONG: ModelConfig = ModelConfig::tokens(0.072, 4.0);

const MODELS: &[ModelSpec] = &[
    model("qwen-max", "qwen-max", QWEN_MAX),
    model("qwen-max-latest", "qwen-max-latest", QWEN_MAX),
    model("qwen-plus", "qwen-plus", QWEN_PLUS),
    model("qwen-plus-latest", "qwen-plus-latest", QWEN_PLUS),
    model("qwen-turbo", "qwen-turbo", QWEN_TURBO),
    model("qwen-turbo-latest", "qwen-turbo-latest", QWEN_TURBO),
    model("qwen3-max", "qwen3-max", QWEN3_MAX),
    model("qwen-long", "qwen-long", QWEN_LONG),
];

static PRICING: LazyLock<ModelPricingTable> = LazyLock::new(|| ModelPricingTable::new(MODELS));

pub struct AliAdaptor;

impl Adaptor for AliAdaptor {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Ali
    }

    fn default_base_url(&self) -> &'static str {
        "https://dashscope.aliyuncs.com"
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
        ensure_chat(self.channel_type(), mode)?;
        Ok("/api/v1/services/aigc/text-generation/generation".to_string())
    }

    fn convert_request(
        &self,
        _channel: &ChannelConfig,
        mode: RelayMode,
        req: &RelayRequest,
    ) -> Result<Value, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        let model_id = self.model_id(&req.model)?;
        let sampling = clamp_sampling(req, SamplingPolicy::TopPBelowOne);

        let mut parameters = Map::new();
        parameters.insert(
            "result_format".to_string(),
            Value::String("message".to_string()),
        );
        insert_opt(&mut parameters, "temperature", sampling.temperature);
        insert_opt(&mut parameters, "top_p", sampling.top_p);
        insert_opt(&mut parameters, "max_tokens", req.max_tokens);
        insert_stop(&mut parameters, "stop", req.stop.sequences());

        Ok(json!({
            "model": model_id,
            "input": { "messages": encode_messages(&req.messages) },
            "parameters": Value::Object(parameters),
        }))
    }

    fn convert_response(
        &self,
        _channel: &ChannelConfig,
        mode: RelayMode,
        body: &Value,
    ) -> Result<RelayResponse, RelayError> {
        ensure_chat(self.channel_type(), mode)?;
        check_error_envelope(body)?;
        if let Some(code) = str_at(body, "/code").filter(|c| !c.is_empty()) {
            let message = str_at(body, "/message").unwrap_or(code);
            return Err(RelayError::UpstreamResponse(message.to_string()));
        }
        let choice = body
            .pointer("/output/choices/0")
            .ok_or_else(|| RelayError::UpstreamResponse("missing output.choices".to_string()))?;
        Ok(RelayResponse {
            id: str_at(body, "/request_id").map(str::to_string),
            content: choice
                .pointer("/message/content")
                .map(crate::urp::value_to_text)
                .unwrap_or_default(),
            reasoning_content: str_at(choice, "/message/reasoning_content")
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            finish_reason: normalize_finish_reason(str_at(choice, "/finish_reason")),
            usage: Usage {
                prompt_tokens: u64_at(body, "/usage/input_tokens"),
                completion_tokens: u64_at(body, "/usage/output_tokens"),
                cached_tokens: u64_at(body, "/usage/prompt_tokens_details/cached_tokens"),
                image_count: 0,
            },
        })
    }
}

inventory::submit!(AdaptorEntry {
    factory: || Box::new(AliAdaptor),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adaptor::normalize::TOP_P_BELOW_ONE;
    use crate::config::ModelPatterns;
    use crate::urp::{FinishReason, Message, Role, Stop};

    fn channel() -> ChannelConfig {
        ChannelConfig {
            id: "ali".to_string(),
            channel_type: ChannelType::Ali,
            base_url: None,
            api_key: "sk".to_string(),
            api_format: None,
            models: ModelPatterns::default(),
        }
    }

    fn request(top_p: Option<f64>, stop: Stop) -> RelayRequest {
        RelayRequest {
            model: "qwen-max-latest".to_string(),
            messages: vec![
                Message::text(Role::System, "sys"),
                Message::text(Role::User, "hi"),
            ],
            temperature: Some(0.7),
            top_p,
            max_tokens: Some(256),
            stop,
            stream: false,
        }
    }

    #[test]
    fn top_p_above_one_maps_below_one() {
        let body = AliAdaptor
            .convert_request(&channel(), RelayMode::ChatCompletions, &request(Some(1.5), Stop::Absent))
            .unwrap();
        assert_eq!(body["parameters"]["top_p"], TOP_P_BELOW_ONE);
        assert_eq!(body["parameters"]["temperature"], 0.7);
        assert_eq!(body["parameters"]["result_format"], "message");
        assert_eq!(body["model"], "qwen-max-latest");
    }

    #[test]
    fn absent_top_p_stays_absent() {
        let body = AliAdaptor
            .convert_request(&channel(), RelayMode::ChatCompletions, &request(None, Stop::Absent))
            .unwrap();
        assert!(body["parameters"].get("top_p").is_none());
        assert!(body["parameters"].get("stop").is_none());
    }

    #[test]
    fn messages_and_stop_are_carried() {
        let body = AliAdaptor
            .convert_request(
                &channel(),
                RelayMode::ChatCompletions,
                &request(None, Stop::Single("STOP".to_string())),
            )
            .unwrap();
        assert_eq!(body["parameters"]["stop"], json!(["STOP"]));
        assert_eq!(body["input"]["messages"][0]["role"], "system");
        assert_eq!(body["input"]["messages"][1]["content"], "hi");
    }

    #[test]
    fn unsupported_mode_is_rejected() {
        let err = AliAdaptor
            .convert_request(&channel(), RelayMode::Embeddings, &request(None, Stop::Absent))
            .unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedOperation { .. }));
    }

    #[test]
    fn decodes_dashscope_response() {
        let body = json!({
            "request_id": "req-1",
            "output": {
                "choices": [{
                    "finish_reason": "length",
                    "message": {"role": "assistant", "content": "partial"}
                }]
            },
            "usage": {
                "input_tokens": 30,
                "output_tokens": 8,
                "prompt_tokens_details": {"cached_tokens": 10}
            }
        });
        let resp = AliAdaptor
            .convert_response(&channel(), RelayMode::ChatCompletions, &body)
            .unwrap();
        assert_eq!(resp.id.as_deref(), Some("req-1"));
        assert_eq!(resp.content, "partial");
        assert_eq!(resp.finish_reason, FinishReason::Length);
        assert_eq!(resp.usage.prompt_tokens, 30);
        assert_eq!(resp.usage.cached_tokens, 10);
    }

    #[test]
    fn dashscope_error_code_is_an_error() {
        let body = json!({"code": "InvalidParameter", "message": "bad top_p", "request_id": "r"});
        let err = AliAdaptor
            .convert_response(&channel(), RelayMode::ChatCompletions, &body)
            .unwrap_err();
        assert!(matches!(err, RelayError::UpstreamResponse(m) if m == "bad top_p"));
    }
}
