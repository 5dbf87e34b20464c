//! The request-lifecycle engine of the patchbay proxy.
//!
//! Accepts inference requests in the Anthropic and OpenAI dialects,
//! selects a backend from the configured catalog by capability and
//! context budget, shapes and translates the payload, dispatches through
//! the failover orchestrator, and returns the response in the caller's
//! dialect, as buffered JSON or relayed SSE.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::Response,
    routing::post,
};
use config::Config;
use futures::Stream;
use serde_json::Value;

pub mod catalog;
pub mod shaper;
pub mod token_count;

mod error;
mod failover;
mod http_client;
mod messages;
mod request;
mod sse;
mod translate;
mod upstream;

pub use catalog::{Backend, Catalog, Needs};
pub use error::{AnthropicErrorResponse, AnthropicResult, LlmError, LlmResult as Result};
pub use failover::{BACKOFF_SECONDS, Dispatch, Failover, FailoverState};
pub use request::RequestContext;
pub use sse::{FrameStream, SseFramer};
pub use upstream::{ApiKind, UpstreamClient, diagnose};

use crate::{
    messages::anthropic::{AnthropicChatRequest, CountTokensResponse},
    sse::UsageAccounting,
};

/// Shared, read-only engine state. Built once at startup; handlers never
/// mutate it. Per-request selection results are passed by value into the
/// failover orchestrator.
pub struct ProxyState {
    pub config: Config,
    pub catalog: Catalog,
    pub client: UpstreamClient,
    pub failover: FailoverState,
}

impl ProxyState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let catalog = Catalog::from_config(&config)?;
        let client = UpstreamClient::new(&config);

        Ok(Self {
            config,
            catalog,
            client,
            failover: FailoverState::new(),
        })
    }

    fn failover_run(&self) -> Failover<'_, UpstreamClient> {
        Failover::new(&self.client, &self.failover, self.config.max_retries)
    }
}

/// Creates the axum router for the proxy endpoints.
pub fn router(state: Arc<ProxyState>) -> Router {
    Router::new()
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1/messages/count_tokens", post(count_tokens))
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(state)
}

/// Check the caller token against the configured table. An empty table
/// disables authentication entirely.
fn authorize(config: &Config, headers: &HeaderMap) -> Result<()> {
    if !config.auth_enabled() {
        return Ok(());
    }

    let presented = headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.strip_prefix("Bearer "))
        });

    match presented {
        Some(token) if config.token_is_valid(token) => Ok(()),
        _ => Err(LlmError::AuthFailed("missing or invalid API token".to_string())),
    }
}

fn parse_body(body: &Bytes) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| LlmError::BadRequest(format!("Invalid JSON body: {e}")))
}

/// Selection output for one request: the chosen backend plus the
/// effective attempt list derived from it.
#[derive(Debug)]
struct Routed {
    backend: Backend,
    attempts: Vec<Backend>,
    estimated_tokens: u32,
}

fn route(state: &ProxyState, raw: &Value) -> Result<Routed> {
    let estimated_tokens = token_count::estimate(raw);
    let needs = Needs::of_request(raw);
    let request_model = raw.get("model").and_then(Value::as_str).unwrap_or_default();

    let backend = state
        .catalog
        .select(request_model, needs, estimated_tokens, &[])
        .ok_or_else(|| no_backend_error(needs))?
        .clone();

    log::debug!(
        "selected backend '{}' for model '{request_model}' (~{estimated_tokens} tokens, vision={}, thinking={})",
        backend.model,
        needs.vision,
        needs.thinking,
    );

    let attempts = state.catalog.effective_attempts(&backend);

    Ok(Routed {
        backend,
        attempts,
        estimated_tokens,
    })
}

fn no_backend_error(needs: Needs) -> LlmError {
    if needs.vision {
        LlmError::BadRequest("no model supports vision".to_string())
    } else if needs.thinking {
        LlmError::BadRequest("no model supports thinking".to_string())
    } else {
        LlmError::BadRequest("no suitable backend available".to_string())
    }
}

fn json_response<T: serde::Serialize>(value: &T) -> Result<Response> {
    let body = serde_json::to_vec(value).map_err(|e| LlmError::Internal(Some(format!("Serialization failed: {e}"))))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from(body))
        .map_err(|e| LlmError::Internal(Some(format!("Response build failed: {e}"))))
}

fn sse_response<S>(stream: S) -> Result<Response>
where
    S: Stream<Item = std::result::Result<Bytes, LlmError>> + Send + 'static,
{
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .map_err(|e| LlmError::Internal(Some(format!("Response build failed: {e}"))))
}

/// Handle Anthropic-dialect requests (`POST /v1/messages`).
///
/// Buffered responses are translated back to the Anthropic shape.
/// Streamed responses relay the upstream SSE verbatim, so callers
/// receive chat-completions shaped events on this endpoint.
async fn anthropic_messages(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AnthropicResult<Response> {
    handle_anthropic(state, headers, body)
        .await
        .map_err(AnthropicErrorResponse::from)
}

async fn handle_anthropic(state: Arc<ProxyState>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    authorize(&state.config, &headers)?;
    let raw = parse_body(&body)?;

    let ctx = RequestContext::new();
    let routed = route(&state, &raw)?;

    let request: AnthropicChatRequest =
        serde_json::from_value(raw).map_err(|e| LlmError::BadRequest(format!("Invalid messages request: {e}")))?;

    let original_model = request.model.clone();
    let tool_names: Vec<String> = request
        .tools
        .iter()
        .flatten()
        .map(|tool| tool.name.clone())
        .collect();
    let stream_requested = request.stream.unwrap_or(false);

    let mut internal = translate::from_anthropic::chat_request(request);
    translate::apply_max_tokens_policy(&mut internal, state.config.max_tokens_limit, state.config.min_tokens_limit);

    let outbound = serde_json::to_value(&internal)
        .map_err(|e| LlmError::Internal(Some(format!("Translation serialization failed: {e}"))))?;
    let shaped = shaper::apply(&routed.backend.transforms, &outbound);

    let _inflight = state.client.register(&ctx);
    let failover = state.failover_run();
    let catalog_primary = state.catalog.primary().map(|backend| backend.model.clone());

    if stream_requested {
        let (frames, used_backend) = failover
            .send_stream(
                &routed.attempts,
                catalog_primary.as_deref(),
                &original_model,
                &shaped,
                &ctx,
                routed.estimated_tokens,
            )
            .await?;

        let accounting = UsageAccounting::new(ctx.request_id, used_backend, ctx.started);
        sse_response(sse::with_usage_accounting(frames, accounting))
    } else {
        let (value, used_backend) = failover
            .send(
                &routed.attempts,
                catalog_primary.as_deref(),
                &original_model,
                &shaped,
                &ctx,
                routed.estimated_tokens,
            )
            .await?;

        let response = translate::to_anthropic::response(value, &tool_names, &original_model)?;

        log::info!(
            "request {} completed via '{used_backend}' in {} ms (input {}, output {} tokens)",
            ctx.request_id,
            ctx.started.elapsed().as_millis(),
            response.usage.input_tokens,
            response.usage.output_tokens,
        );

        json_response(&response)
    }
}

/// Handle `POST /v1/messages/count_tokens`: estimate input tokens over
/// the body's system prompt and messages.
async fn count_tokens(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    body: Bytes,
) -> AnthropicResult<Response> {
    let result = (|| {
        authorize(&state.config, &headers)?;
        let raw = parse_body(&body)?;
        json_response(&CountTokensResponse {
            input_tokens: token_count::estimate(&raw),
        })
    })();

    result.map_err(AnthropicErrorResponse::from)
}

/// Handle OpenAI-dialect requests (`POST /v1/chat/completions`).
///
/// The body is already in the internal shape, so it is shaped and
/// dispatched as-is; unknown fields pass through untouched. Streamed
/// responses are relayed with an instrumentation wrapper that captures
/// in-band usage for post-stream logging.
async fn chat_completions(State(state): State<Arc<ProxyState>>, headers: HeaderMap, body: Bytes) -> Result<Response> {
    authorize(&state.config, &headers)?;
    let raw = parse_body(&body)?;

    let ctx = RequestContext::new();
    let routed = route(&state, &raw)?;

    let original_model = raw
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let stream_requested = raw.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let shaped = shaper::apply(&routed.backend.transforms, &raw);

    let _inflight = state.client.register(&ctx);
    let failover = state.failover_run();
    let catalog_primary = state.catalog.primary().map(|backend| backend.model.clone());

    if stream_requested {
        let (frames, used_backend) = failover
            .send_stream(
                &routed.attempts,
                catalog_primary.as_deref(),
                &original_model,
                &shaped,
                &ctx,
                routed.estimated_tokens,
            )
            .await?;

        let accounting = UsageAccounting::new(ctx.request_id, used_backend, ctx.started);
        sse_response(sse::with_usage_accounting(frames, accounting))
    } else {
        let (value, used_backend) = failover
            .send(
                &routed.attempts,
                catalog_primary.as_deref(),
                &original_model,
                &shaped,
                &ctx,
                routed.estimated_tokens,
            )
            .await?;

        match value.get("usage") {
            Some(usage) if !usage.is_null() => log::info!(
                "request {} completed via '{used_backend}' in {} ms (usage {usage})",
                ctx.request_id,
                ctx.started.elapsed().as_millis(),
            ),
            _ => log::info!(
                "request {} completed via '{used_backend}' in {} ms",
                ctx.request_id,
                ctx.started.elapsed().as_millis(),
            ),
        }

        json_response(&value)
    }
}

/// Round-trip a trivial completion through the engine; used by the
/// server's connection-test endpoint.
pub async fn test_connection(state: &ProxyState) -> Result<(String, u128)> {
    let probe = serde_json::json!({
        "model": state.catalog.primary().map(|backend| backend.model_id.clone()).unwrap_or_default(),
        "messages": [{"role": "user", "content": "ping"}],
        "max_tokens": 16,
    });

    let ctx = RequestContext::new();
    let routed = route(state, &probe)?;
    let shaped = shaper::apply(&routed.backend.transforms, &probe);

    let _inflight = state.client.register(&ctx);
    let catalog_primary = state.catalog.primary().map(|backend| backend.model.clone());

    let (_, used_backend) = state
        .failover_run()
        .send(
            &routed.attempts,
            catalog_primary.as_deref(),
            "test-connection",
            &shaped,
            &ctx,
            routed.estimated_tokens,
        )
        .await?;

    Ok((used_backend, ctx.started.elapsed().as_millis()))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    fn state(toml: &str) -> ProxyState {
        let config: Config = toml::from_str(toml).unwrap();
        ProxyState::new(config).unwrap()
    }

    fn two_backend_state() -> ProxyState {
        state(indoc! {r#"
            [tokens]
            alice = "sk-proxy-1"

            [provider.openai]
            api_key = "key"
            base_url = "https://api.openai.com/v1"

            [[backend]]
            model = "openai:gpt-4o-mini"

            [[backend]]
            model = "openai:gpt-4o"
            vision = true
        "#})
    }

    #[test]
    fn authorize_accepts_either_header_form() {
        let state = two_backend_state();

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-proxy-1".parse().unwrap());
        assert!(authorize(&state.config, &headers).is_ok());

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer sk-proxy-1".parse().unwrap());
        assert!(authorize(&state.config, &headers).is_ok());
    }

    #[test]
    fn authorize_rejects_missing_and_wrong_tokens() {
        let state = two_backend_state();

        let error = authorize(&state.config, &HeaderMap::new()).unwrap_err();
        assert!(matches!(error, LlmError::AuthFailed(_)));

        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "sk-wrong".parse().unwrap());
        assert!(authorize(&state.config, &headers).is_err());
    }

    #[test]
    fn authorize_is_disabled_without_tokens() {
        let state = state(indoc! {r#"
            [provider.openai]
            api_key = "key"
            base_url = "https://api.openai.com/v1"

            [[backend]]
            model = "openai:gpt-4o"
        "#});

        assert!(authorize(&state.config, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn route_names_the_unmet_capability() {
        let state = two_backend_state();

        // Thinking is configured on no backend.
        let error = route(
            &state,
            &serde_json::json!({"model": "any", "thinking": {"type": "enabled"}, "messages": []}),
        )
        .unwrap_err();
        assert_eq!(error.to_string(), "no model supports thinking");

        // Vision is available on the second backend.
        let routed = route(
            &state,
            &serde_json::json!({"model": "any", "messages": [
                {"role": "user", "content": [{"type": "image_url", "image_url": {"url": "x"}}]}
            ]}),
        )
        .unwrap();
        assert_eq!(routed.backend.model, "openai:gpt-4o");
        assert_eq!(routed.attempts.len(), 2);
        assert_eq!(routed.attempts[0].model, "openai:gpt-4o");
        assert_eq!(routed.attempts[1].model, "openai:gpt-4o-mini");
    }

    #[test]
    fn route_reports_generic_unavailability() {
        let state = state(indoc! {r#"
            [provider.openai]
            api_key = "key"
            base_url = "https://api.openai.com/v1"

            [[backend]]
            model = "openai:gpt-4o"
            context = 1000
        "#});

        let long_text = "word ".repeat(4000);
        let error = route(
            &state,
            &serde_json::json!({"model": "any", "messages": [{"role": "user", "content": long_text}]}),
        )
        .unwrap_err();

        assert_eq!(error.to_string(), "no suitable backend available");
    }

    #[test]
    fn parse_body_rejects_invalid_json() {
        let error = parse_body(&Bytes::from_static(b"{nope")).unwrap_err();
        assert!(matches!(error, LlmError::BadRequest(_)));
        assert!(error.to_string().starts_with("Invalid JSON body"));
    }
}
