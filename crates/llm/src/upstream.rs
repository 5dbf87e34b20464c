//! Upstream HTTP client: endpoint construction, dispatch, streaming.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::Duration,
};

use config::{Config, ProviderConfig};
use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::{
    catalog::Backend,
    error::LlmError,
    http_client::http_client,
    request::RequestContext,
    sse::{FrameStream, relay_data_frames},
    translate::to_responses,
};

/// Which upstream API a request is encoded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKind {
    ChatCompletions,
    Responses,
}

impl ApiKind {
    /// Model ids beginning `gpt-5` use the Responses API; everything
    /// else uses chat completions.
    pub fn for_model_id(model_id: &str) -> Self {
        if model_id.starts_with("gpt-5") {
            Self::Responses
        } else {
            Self::ChatCompletions
        }
    }

    fn path_segments(&self) -> &'static [&'static str] {
        match self {
            Self::ChatCompletions => &["chat", "completions"],
            Self::Responses => &["responses"],
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            Self::ChatCompletions => "chat/completions",
            Self::Responses => "responses",
        }
    }
}

/// Issues requests against configured providers.
///
/// Holds the shared connection pool, the provider table, the per-attempt
/// deadline, and the in-flight registry backing `cancel(request_id)`.
pub struct UpstreamClient {
    client: reqwest::Client,
    providers: HashMap<String, ProviderConfig>,
    request_timeout: Duration,
    inflight: Mutex<HashMap<Uuid, CancellationToken>>,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Self {
        Self {
            client: http_client(),
            providers: config
                .provider
                .iter()
                .map(|(name, provider)| (name.clone(), provider.clone()))
                .collect(),
            request_timeout: Duration::from_secs(config.request_timeout),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn provider_for(&self, backend: &Backend) -> Result<&ProviderConfig, LlmError> {
        self.providers.get(&backend.provider).ok_or_else(|| {
            LlmError::Internal(Some(format!(
                "No provider configured for '{}' (backend '{}')",
                backend.provider, backend.model
            )))
        })
    }

    /// Build the endpoint URL for a provider and API kind.
    ///
    /// Standard providers append the API path to the base URL. Providers
    /// with an `api_version` use the Azure deployment pattern with the
    /// model id URL-encoded into the path.
    pub fn endpoint_url(provider: &ProviderConfig, model_id: &str, api: ApiKind) -> Result<String, LlmError> {
        let Some(api_version) = provider.api_version.as_deref() else {
            return Ok(format!("{}/{}", provider.base_url_trimmed(), api.suffix()));
        };

        let mut url = Url::parse(provider.base_url_trimmed())
            .map_err(|e| LlmError::Internal(Some(format!("Invalid base_url '{}': {e}", provider.base_url))))?;

        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| LlmError::Internal(Some(format!("base_url '{}' cannot be a base", provider.base_url))))?;
            segments.pop_if_empty();
            segments.push("openai");
            segments.push("deployments");
            segments.push(model_id);
            for segment in api.path_segments() {
                segments.push(segment);
            }
        }

        url.query_pairs_mut().append_pair("api-version", api_version);

        Ok(url.into())
    }

    fn request_builder(&self, provider: &ProviderConfig, url: &str) -> reqwest::RequestBuilder {
        let builder = self.client.post(url);

        if provider.is_azure() {
            builder.header("api-key", provider.api_key.expose_secret())
        } else {
            builder.header(AUTHORIZATION, format!("Bearer {}", provider.api_key.expose_secret()))
        }
    }

    /// Issue a buffered request and parse the JSON response.
    pub async fn send(&self, backend: &Backend, body: &Value, ctx: &RequestContext) -> Result<Value, LlmError> {
        let provider = self.provider_for(backend)?;
        let api = ApiKind::for_model_id(&backend.model_id);
        let url = Self::endpoint_url(provider, &backend.model_id, api)?;

        let outbound = match api {
            ApiKind::Responses => to_responses::encode(body),
            ApiKind::ChatCompletions => body.clone(),
        };

        let request = self
            .request_builder(provider, &url)
            .timeout(self.request_timeout)
            .json(&outbound);

        let exchange = async {
            let response = request.send().await.map_err(map_transport_error)?;
            let status = response.status();

            if !status.is_success() {
                let body_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                log::error!(
                    "Upstream '{}' returned {status} ({}): {body_text}",
                    backend.model,
                    diagnose(&body_text)
                );

                return Err(LlmError::UpstreamHttp {
                    status: status.as_u16(),
                    body: body_text,
                });
            }

            response.json::<Value>().await.map_err(map_transport_error)
        };

        tokio::select! {
            () = ctx.cancel.cancelled() => Err(LlmError::ClientDisconnected),
            result = exchange => result,
        }
    }

    /// Issue a streaming request and return the filtered SSE frame
    /// stream. The deadline covers connection and response headers; the
    /// stream itself runs until EOF or cancellation.
    pub async fn send_stream(
        &self,
        backend: &Backend,
        body: &Value,
        ctx: &RequestContext,
    ) -> Result<FrameStream, LlmError> {
        let provider = self.provider_for(backend)?;
        let api = ApiKind::for_model_id(&backend.model_id);
        let url = Self::endpoint_url(provider, &backend.model_id, api)?;

        let mut outbound = match api {
            ApiKind::Responses => to_responses::encode(body),
            ApiKind::ChatCompletions => body.clone(),
        };

        if let Some(map) = outbound.as_object_mut() {
            map.insert("stream".to_string(), Value::Bool(true));
            if api == ApiKind::ChatCompletions {
                map.insert(
                    "stream_options".to_string(),
                    serde_json::json!({ "include_usage": true }),
                );
            }
        }

        let request = self.request_builder(provider, &url).json(&outbound);

        let send = async {
            let response = tokio::time::timeout(self.request_timeout, request.send())
                .await
                .map_err(|_| LlmError::UpstreamTimeout)?
                .map_err(map_transport_error)?;

            let status = response.status();

            if !status.is_success() {
                let body_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
                log::error!(
                    "Upstream '{}' refused stream with {status} ({}): {body_text}",
                    backend.model,
                    diagnose(&body_text)
                );

                return Err(LlmError::UpstreamHttp {
                    status: status.as_u16(),
                    body: body_text,
                });
            }

            Ok(response)
        };

        let response = tokio::select! {
            () = ctx.cancel.cancelled() => return Err(LlmError::ClientDisconnected),
            result = send => result?,
        };

        let frames = relay_data_frames(response.bytes_stream().boxed());
        let cancellable = frames.take_until(ctx.cancel.clone().cancelled_owned());

        Ok(Box::pin(cancellable))
    }

    /// Track a request so it can be aborted by id.
    pub fn register(&self, ctx: &RequestContext) -> InflightGuard<'_> {
        self.inflight
            .lock()
            .expect("inflight registry lock poisoned")
            .insert(ctx.request_id, ctx.cancel.clone());

        InflightGuard {
            client: self,
            request_id: ctx.request_id,
        }
    }

    /// Abort an in-flight request. Returns whether the id was known.
    pub fn cancel(&self, request_id: Uuid) -> bool {
        let token = self
            .inflight
            .lock()
            .expect("inflight registry lock poisoned")
            .get(&request_id)
            .cloned();

        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Removes a request from the in-flight registry on every exit path.
pub struct InflightGuard<'a> {
    client: &'a UpstreamClient,
    request_id: Uuid,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.client
            .inflight
            .lock()
            .expect("inflight registry lock poisoned")
            .remove(&self.request_id);
    }
}

fn map_transport_error(error: reqwest::Error) -> LlmError {
    if error.is_timeout() {
        LlmError::UpstreamTimeout
    } else {
        LlmError::Internal(Some(format!("Failed to reach upstream: {error}")))
    }
}

/// Map lower-cased upstream error text to a human-readable cause for
/// diagnostic logs.
pub fn diagnose(error_text: &str) -> &'static str {
    let text = error_text.to_lowercase();

    if text.contains("unsupported_country_region_territory") || text.contains("country, region, or territory") {
        "unsupported region"
    } else if text.contains("invalid api key") || text.contains("incorrect api key") || text.contains("invalid_api_key")
    {
        "invalid key"
    } else if text.contains("rate limit") || text.contains("rate_limit") || text.contains("too many requests") {
        "rate limit"
    } else if text.contains("model_not_found") || text.contains("model not found") || text.contains("does not exist") {
        "model not found"
    } else if text.contains("billing") || text.contains("insufficient_quota") || text.contains("current quota") {
        "billing"
    } else {
        "unknown"
    }
}
