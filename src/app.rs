use crate::access::{SubnetAllowList, enforce_allow_list};
use crate::adaptor::{AdaptorRegistry, registry};
use crate::billing::{BillingSink, TracingBillingSink};
use crate::config::{ChannelConfig, load_channels};
use crate::error::{AppError, AppResult};
use crate::lifecycle::{LifecycleManager, track_in_flight};
use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::PathBuf;
use std::sync::{Arc, Once, OnceLock};
use std::time::Duration;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeConfig>,
    pub lifecycle: LifecycleManager,
    pub adaptors: Arc<AdaptorRegistry>,
    pub channels: Arc<Vec<ChannelConfig>>,
    pub http: reqwest::Client,
    pub metrics: PrometheusHandle,
    pub billing: Arc<dyn BillingSink>,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: String,
    pub metrics_path: String,
    pub channels_file: Option<PathBuf>,
    pub allowed_subnets: SubnetAllowList,
    pub drain_timeout: Duration,
    pub upstream_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            metrics_path: "/metrics".to_string(),
            channels_file: None,
            allowed_subnets: SubnetAllowList::default(),
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
            upstream_timeout: Duration::from_millis(DEFAULT_UPSTREAM_TIMEOUT_MS),
        }
    }
}

impl RuntimeConfig {
    /// Blank variables fall back to defaults. A malformed subnet list or
    /// duration is a startup error.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();
        let listen = env_non_empty("RELAY_LISTEN").unwrap_or(defaults.listen);
        let metrics_path = env_non_empty("RELAY_METRICS_PATH").unwrap_or(defaults.metrics_path);
        let channels_file = env_non_empty("RELAY_CHANNELS_FILE").map(PathBuf::from);
        let allowed_subnets = match env_non_empty("RELAY_ALLOWED_SUBNETS") {
            Some(raw) => SubnetAllowList::parse(&raw)?,
            None => defaults.allowed_subnets,
        };
        let drain_timeout = env_u64("RELAY_DRAIN_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.drain_timeout);
        let upstream_timeout = env_u64("RELAY_UPSTREAM_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.upstream_timeout);
        Ok(Self {
            listen,
            metrics_path,
            channels_file,
            allowed_subnets,
            drain_timeout,
            upstream_timeout,
        })
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(key: &str) -> AppResult<Option<u64>> {
    env_non_empty(key)
        .map(|raw| {
            raw.parse::<u64>().map_err(|err| {
                AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "config_invalid",
                    format!("{key}={raw}: {err}"),
                )
                .with_type("server_error")
            })
        })
        .transpose()
}

pub async fn load_state() -> AppResult<AppState> {
    load_state_with_runtime(RuntimeConfig::from_env()?).await
}

pub async fn load_state_with_runtime(runtime: RuntimeConfig) -> AppResult<AppState> {
    let channels = match &runtime.channels_file {
        Some(path) => load_channels(path)?,
        None => Vec::new(),
    };
    load_state_with_channels(runtime, channels, Arc::new(TracingBillingSink)).await
}

/// Builds state from already-parsed channels; used by tests and embedders.
pub async fn load_state_with_channels(
    runtime: RuntimeConfig,
    channels: Vec<ChannelConfig>,
    billing: Arc<dyn BillingSink>,
) -> AppResult<AppState> {
    let http = reqwest::Client::builder()
        .user_agent("llm-relay/0.1")
        .build()
        .map_err(|err| {
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "http_client_init_failed",
                err.to_string(),
            )
        })?;

    let metrics = init_metrics()?;
    let adaptors = registry();

    for channel in &channels {
        if !adaptors.contains_key(&channel.channel_type) {
            return Err(AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_invalid",
                format!(
                    "channel {} has no adaptor for {}",
                    channel.id,
                    channel.channel_type.as_str()
                ),
            ));
        }
    }
    tracing::info!(
        channels = channels.len(),
        allowed_subnets = runtime.allowed_subnets.len(),
        "relay state loaded"
    );

    Ok(AppState {
        runtime: Arc::new(runtime),
        lifecycle: LifecycleManager::new(),
        adaptors: Arc::new(adaptors),
        channels: Arc::new(channels),
        http,
        metrics,
        billing,
    })
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "metrics_init_failed",
                    err.to_string(),
                ));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE.get().cloned().ok_or_else(|| {
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics_init_failed",
            "metrics recorder not available",
        )
    })
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.runtime.metrics_path.clone();
    let lifecycle = state.lifecycle.clone();
    let allow_list = state.runtime.allowed_subnets.clone();

    let mut router = Router::<AppState>::new()
        .route("/v1/models", get(crate::handlers::list_models))
        .route(&metrics_path, get(crate::handlers::metrics))
        .fallback(crate::handlers::relay)
        .with_state(state);

    if !allow_list.is_empty() {
        router = router.layer(middleware::from_fn_with_state(
            Arc::new(allow_list),
            enforce_allow_list,
        ));
    }

    router
        .layer(middleware::from_fn_with_state(lifecycle, track_in_flight))
        .layer(SetRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(
            axum::http::header::HeaderName::from_static("x-request-id"),
        ))
        .layer(TraceLayer::new_for_http())
}
