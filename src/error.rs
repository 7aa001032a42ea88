use crate::relay_mode::RelayMode;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("invalid subnet {entry:?}: {reason}")]
    InvalidSubnet { entry: String, reason: String },
    #[error("invalid stop field: {0}")]
    InvalidStop(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{channel} channels do not support {mode:?}")]
    UnsupportedOperation { channel: &'static str, mode: RelayMode },
    #[error("malformed upstream response: {0}")]
    UpstreamResponse(String),
    #[error("drain timed out with {in_flight} requests in flight and {pending_tasks} critical tasks pending")]
    DrainTimeout { in_flight: i64, pending_tasks: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub error_type: String,
    pub param: Option<String>,
}

impl AppError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            error_type: "invalid_request_error".to_string(),
            param: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = error_type.into();
        self
    }

    pub fn with_param(mut self, param: impl Into<String>) -> Self {
        self.param = Some(param.into());
        self
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        let message = err.to_string();
        match err {
            RelayError::UnknownModel(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "model_not_found", message)
                    .with_param("model")
            }
            RelayError::InvalidStop(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "invalid_stop", message).with_param("stop")
            }
            RelayError::InvalidRequest(_) => {
                AppError::new(StatusCode::BAD_REQUEST, "invalid_request", message)
            }
            RelayError::UnsupportedOperation { .. } => {
                AppError::new(StatusCode::BAD_REQUEST, "unsupported_operation", message)
            }
            RelayError::UpstreamResponse(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "upstream_response_invalid", message)
                    .with_type("upstream_error")
            }
            RelayError::InvalidSubnet { .. } | RelayError::Config(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "config_invalid", message)
                    .with_type("server_error")
            }
            RelayError::DrainTimeout { .. } => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "drain_timeout", message)
                    .with_type("server_error")
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
    param: Option<String>,
    code: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                message: self.message,
                error_type: self.error_type,
                param: self.param,
                code: self.code,
            },
        };
        (self.status, axum::Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
