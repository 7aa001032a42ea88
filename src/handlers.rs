use crate::adaptor::{Adaptor, ensure_pricing_mode};
use crate::app::AppState;
use crate::billing::{PendingCharge, settle};
use crate::config::ChannelConfig;
use crate::error::{AppError, AppResult, RelayError};
use crate::relay_mode::{RelayMode, classify};
use crate::upstream::{self, UpstreamCallError, UpstreamErrorKind};
use crate::urp::{ImageRequest, RelayRequest, Usage};
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

/// Union of the models each configured channel can serve.
pub async fn list_models(State(state): State<AppState>) -> AppResult<Response> {
    let mut owners: BTreeMap<&'static str, &'static str> = BTreeMap::new();
    for channel in state.channels.iter() {
        let Some(adaptor) = state.adaptors.get(&channel.channel_type) else {
            continue;
        };
        for model in adaptor.pricing().models() {
            if channel.serves_model(model) {
                owners
                    .entry(model)
                    .or_insert_with(|| channel.channel_type.as_str());
            }
        }
    }

    let data: Vec<Value> = owners
        .into_iter()
        .map(|(id, owned_by)| {
            json!({
                "id": id,
                "object": "model",
                "created": 0,
                "owned_by": owned_by
            })
        })
        .collect();
    Ok(Json(json!({ "object": "list", "data": data })).into_response())
}

/// Entry point for every relay path; the operation kind comes from the path alone.
pub async fn relay(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let mode = classify(uri.path());
    metrics::counter!("relay_requests_total", "mode" => mode.as_str()).increment(1);

    if mode == RelayMode::Unknown {
        return Err(AppError::new(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no route for {}", uri.path()),
        ));
    }
    if method != Method::POST {
        return Err(AppError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            format!("{} expects POST", mode.as_str()),
        ));
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| RelayError::InvalidRequest(format!("body is not JSON: {err}")))?;
    let request_id = extract_request_id(&headers);

    match mode {
        RelayMode::ChatCompletions => relay_chat(&state, mode, &payload, request_id).await,
        RelayMode::ImagesGenerations => relay_images(&state, mode, &payload, request_id).await,
        other => Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "unsupported_operation",
            format!("{} is not relayed", other.as_str()),
        )),
    }
}

async fn relay_chat(
    state: &AppState,
    mode: RelayMode,
    payload: &Value,
    request_id: Option<String>,
) -> AppResult<Response> {
    let req = RelayRequest::from_value(payload)?;
    if req.stream {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "unsupported_operation",
            "streaming responses are not supported",
        )
        .with_param("stream"));
    }

    let (channel, adaptor) = select_channel(state, &req.model)?;
    ensure_pricing_mode(adaptor.as_ref(), &req.model, mode)?;
    let model_id = adaptor.model_id(&req.model)?;
    let path = adaptor.request_path(channel, mode, model_id)?;
    let vendor_body = adaptor.convert_request(channel, mode, &req)?;

    let raw = call(state, channel, adaptor.as_ref(), &path, &vendor_body).await?;
    let resp = adaptor.convert_response(channel, mode, &raw)?;
    tracing::info!(
        channel_id = %channel.id,
        model = %req.model,
        finish_reason = resp.finish_reason.as_str(),
        prompt_tokens = resp.usage.prompt_tokens,
        completion_tokens = resp.usage.completion_tokens,
        "chat completion relayed"
    );

    spawn_billing(state, adaptor, channel, &req.model, resp.usage, request_id);
    Ok(Json(resp.to_chat_completion(&req.model)).into_response())
}

async fn relay_images(
    state: &AppState,
    mode: RelayMode,
    payload: &Value,
    request_id: Option<String>,
) -> AppResult<Response> {
    let req = ImageRequest::from_value(payload)?;
    let (channel, adaptor) = select_channel(state, &req.model)?;
    ensure_pricing_mode(adaptor.as_ref(), &req.model, mode)?;
    let model_id = adaptor.model_id(&req.model)?;
    let path = adaptor.request_path(channel, mode, model_id)?;
    let vendor_body = adaptor.convert_image_request(channel, &req)?;

    let raw = call(state, channel, adaptor.as_ref(), &path, &vendor_body).await?;
    let resp = adaptor.convert_image_response(channel, &raw)?;
    tracing::info!(
        channel_id = %channel.id,
        model = %req.model,
        image_count = resp.usage.image_count,
        "image generation relayed"
    );

    spawn_billing(state, adaptor, channel, &req.model, resp.usage, request_id);
    Ok(Json(resp.to_openai()).into_response())
}

/// First channel, in configuration order, whose adaptor prices `model` and
/// whose patterns admit it.
fn select_channel<'a>(
    state: &'a AppState,
    model: &str,
) -> Result<(&'a ChannelConfig, Arc<dyn Adaptor>), RelayError> {
    state
        .channels
        .iter()
        .find_map(|channel| {
            let adaptor = state.adaptors.get(&channel.channel_type)?;
            (adaptor.pricing().contains(model) && channel.serves_model(model))
                .then(|| (channel, adaptor.clone()))
        })
        .ok_or_else(|| RelayError::UnknownModel(model.to_string()))
}

async fn call(
    state: &AppState,
    channel: &ChannelConfig,
    adaptor: &dyn Adaptor,
    path: &str,
    body: &Value,
) -> AppResult<Value> {
    upstream::call_channel(
        &state.http,
        channel,
        adaptor.default_base_url(),
        path,
        body,
        state.runtime.upstream_timeout,
    )
    .await
    .map_err(|err| {
        metrics::counter!(
            "relay_upstream_errors_total",
            "channel_type" => channel.channel_type.as_str()
        )
        .increment(1);
        tracing::warn!(
            channel_id = %channel.id,
            status = ?err.status,
            code = err.code.as_deref().unwrap_or(""),
            "upstream call failed: {}",
            err.message
        );
        upstream_error_to_app(err)
    })
}

fn spawn_billing(
    state: &AppState,
    adaptor: Arc<dyn Adaptor>,
    channel: &ChannelConfig,
    model: &str,
    usage: Usage,
    request_id: Option<String>,
) {
    let sink = state.billing.clone();
    let pending = PendingCharge {
        request_id,
        channel_id: channel.id.clone(),
        model: model.to_string(),
        usage,
    };
    state.lifecycle.run_critical("billing", async move {
        settle(adaptor.pricing(), sink.as_ref(), pending).await;
    });
}

fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn upstream_error_to_app(err: UpstreamCallError) -> AppError {
    match err.kind {
        UpstreamErrorKind::Network => {
            AppError::new(StatusCode::BAD_GATEWAY, "upstream_unavailable", err.message)
                .with_type("upstream_error")
        }
        UpstreamErrorKind::Http => {
            let status = err.status.unwrap_or(StatusCode::BAD_GATEWAY);
            let status = if status.is_success() {
                StatusCode::BAD_GATEWAY
            } else {
                status
            };
            AppError::new(status, err.code.unwrap_or_else(|| "upstream_error".to_string()), err.message)
                .with_type("upstream_error")
        }
    }
}
