use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Proxy errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Missing or invalid caller token.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Malformed request body, or no backend qualifies for the request.
    #[error("{0}")]
    BadRequest(String),

    /// The caller went away while a buffered request was in flight.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Non-2xx response from the upstream provider.
    #[error("Upstream returned {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    /// The per-attempt upstream deadline expired.
    #[error("Upstream request timed out")]
    UpstreamTimeout,

    /// Every backend failed for the configured number of retry cycles.
    #[error("All backends failed after {0} retry cycles")]
    AllBackendsFailed(u32),

    /// Unclassified failure.
    /// If Some(message), it came from upstream and can be shown.
    /// If None, it is internal and details should not leak.
    #[error("Internal server error")]
    Internal(Option<String>),
}

impl LlmError {
    /// The HTTP status code returned to the caller for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            // Nginx-style "client closed request"; not a registered code,
            // so it has to go through from_u16.
            Self::ClientDisconnected => StatusCode::from_u16(499).expect("499 is in the valid status range"),
            Self::UpstreamHttp { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::AllBackendsFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error type string used in response bodies.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AuthFailed(_) => "authentication_error",
            Self::BadRequest(_) => "invalid_request_error",
            Self::ClientDisconnected => "client_disconnected",
            Self::UpstreamHttp { .. } => "api_error",
            Self::UpstreamTimeout => "timeout_error",
            Self::AllBackendsFailed(_) => "overloaded_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Short kind name used when no numeric error code can be extracted.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::AuthFailed(_) => "auth_failed",
            Self::BadRequest(_) => "bad_request",
            Self::ClientDisconnected => "client_disconnected",
            Self::UpstreamHttp { .. } => "upstream_http",
            Self::UpstreamTimeout => "upstream_timeout",
            Self::AllBackendsFailed(_) => "all_backends_failed",
            Self::Internal(_) => "internal",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(Some(upstream_msg)) => upstream_msg.clone(),
            Self::Internal(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error response format compatible with the OpenAI API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for LlmError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.client_message(),
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

/// Error response format for the Anthropic dialect.
#[derive(Debug, Serialize)]
pub struct AnthropicErrorBody {
    r#type: &'static str,
    error: AnthropicErrorDetails,
}

#[derive(Debug, Serialize)]
struct AnthropicErrorDetails {
    r#type: String,
    message: String,
}

pub struct AnthropicErrorResponse {
    status: StatusCode,
    body: AnthropicErrorBody,
}

impl From<LlmError> for AnthropicErrorResponse {
    fn from(error: LlmError) -> Self {
        Self {
            status: error.status_code(),
            body: AnthropicErrorBody {
                r#type: "error",
                error: AnthropicErrorDetails {
                    r#type: error.error_type().to_string(),
                    message: error.client_message(),
                },
            },
        }
    }
}

impl IntoResponse for AnthropicErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

pub type AnthropicResult<T> = std::result::Result<T, AnthropicErrorResponse>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(LlmError::AuthFailed("no token".into()).status_code(), 401);
        assert_eq!(LlmError::BadRequest("bad".into()).status_code(), 400);
        assert_eq!(LlmError::ClientDisconnected.status_code().as_u16(), 499);
        assert_eq!(
            LlmError::UpstreamHttp {
                status: 429,
                body: "slow down".into()
            }
            .status_code(),
            429
        );
        assert_eq!(LlmError::UpstreamTimeout.status_code(), 504);
        assert_eq!(LlmError::AllBackendsFailed(10).status_code(), 503);
        assert_eq!(LlmError::Internal(None).status_code(), 500);
    }

    #[test]
    fn unusable_upstream_status_maps_to_bad_gateway() {
        let error = LlmError::UpstreamHttp {
            status: 42,
            body: "odd".into(),
        };
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn internal_without_message_does_not_leak() {
        assert_eq!(LlmError::Internal(None).client_message(), "Internal server error");
        assert_eq!(
            LlmError::Internal(Some("upstream said no".into())).client_message(),
            "upstream said no"
        );
    }

    #[test]
    fn exhausted_failover_message_names_the_cycle_count() {
        assert_eq!(
            LlmError::AllBackendsFailed(10).to_string(),
            "All backends failed after 10 retry cycles"
        );
    }
}
