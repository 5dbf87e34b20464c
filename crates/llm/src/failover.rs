//! Failover orchestration over an explicit attempt list.
//!
//! The attempt list is built per request and passed by value; the shared
//! catalog is never mutated. The only cross-request state is the primary
//! cooldown timestamp, armed when the configured primary reports a daily
//! limit, and it may only ever advance forward in time.

use std::{sync::Mutex, time::Duration};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::{
    catalog::Backend,
    error::LlmError,
    request::RequestContext,
    sse::FrameStream,
    upstream::UpstreamClient,
};

/// Backoff slept between retry cycles, saturating at the last entry.
pub const BACKOFF_SECONDS: [u64; 8] = [2, 4, 8, 15, 15, 30, 30, 60];

/// How long the primary sits out after a daily-limit error.
const PRIMARY_COOLDOWN: Duration = Duration::from_secs(300);

/// Substring that marks a daily-limit error, matched case-insensitively.
const DAY_LIMIT_MARKER: &str = "day limit exceeded";

/// Process-lifetime failover state.
#[derive(Debug, Default)]
pub struct FailoverState {
    primary_cooldown_until: Mutex<Option<Instant>>,
}

impl FailoverState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the configured primary may currently be attempted.
    pub fn primary_available(&self) -> bool {
        match *self
            .primary_cooldown_until
            .lock()
            .expect("cooldown lock poisoned")
        {
            Some(until) => Instant::now() >= until,
            None => true,
        }
    }

    /// Arm the cooldown. Monotonic: an already-armed later deadline is
    /// never pulled back.
    pub fn arm_primary_cooldown(&self) {
        let until = Instant::now() + PRIMARY_COOLDOWN;
        let mut guard = self
            .primary_cooldown_until
            .lock()
            .expect("cooldown lock poisoned");

        if guard.is_none_or(|current| until > current) {
            *guard = Some(until);
        }
    }
}

/// Dispatch seam between the orchestrator and the upstream client.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn send(&self, backend: &Backend, body: &Value, ctx: &RequestContext) -> Result<Value, LlmError>;

    async fn send_stream(&self, backend: &Backend, body: &Value, ctx: &RequestContext)
    -> Result<FrameStream, LlmError>;
}

#[async_trait]
impl Dispatch for UpstreamClient {
    async fn send(&self, backend: &Backend, body: &Value, ctx: &RequestContext) -> Result<Value, LlmError> {
        UpstreamClient::send(self, backend, body, ctx).await
    }

    async fn send_stream(
        &self,
        backend: &Backend,
        body: &Value,
        ctx: &RequestContext,
    ) -> Result<FrameStream, LlmError> {
        UpstreamClient::send_stream(self, backend, body, ctx).await
    }
}

/// One request's failover run over its attempt list.
pub struct Failover<'a, D: Dispatch> {
    dispatch: &'a D,
    state: &'a FailoverState,
    max_cycles: u32,
}

impl<'a, D: Dispatch> Failover<'a, D> {
    pub fn new(dispatch: &'a D, state: &'a FailoverState, max_cycles: u32) -> Self {
        Self {
            dispatch,
            state,
            max_cycles: max_cycles.max(1),
        }
    }

    /// Buffered dispatch. Returns the response body and the model of the
    /// backend that served it.
    ///
    /// With a single-entry attempt list failover is inactive: one
    /// attempt, errors propagate.
    pub async fn send(
        &self,
        attempts: &[Backend],
        catalog_primary: Option<&str>,
        original_model: &str,
        body: &Value,
        ctx: &RequestContext,
        estimated_tokens: u32,
    ) -> Result<(Value, String), LlmError> {
        if attempts.len() <= 1 {
            let backend = single_attempt(attempts)?;
            let outbound = with_model(body, &backend.model_id);
            let response = self.dispatch.send(backend, &outbound, ctx).await?;
            return Ok((response, backend.model.clone()));
        }

        let mut cycle = 0u32;

        loop {
            'cycle: for backend in self.current_attempts(attempts, catalog_primary) {
                let outbound = with_model(body, &backend.model_id);

                match self.dispatch.send(backend, &outbound, ctx).await {
                    Ok(response) => return Ok((response, backend.model.clone())),
                    // A gone caller is terminal, not a backend fault.
                    Err(LlmError::ClientDisconnected) => return Err(LlmError::ClientDisconnected),
                    Err(error) => {
                        if self.handle_failure(backend, catalog_primary, original_model, estimated_tokens, &error) {
                            break 'cycle;
                        }
                    }
                }
            }

            cycle += 1;
            if cycle >= self.max_cycles {
                return Err(LlmError::AllBackendsFailed(self.max_cycles));
            }

            tokio::time::sleep(backoff_for_cycle(cycle)).await;
        }
    }

    /// Streaming dispatch. Success means the stream was constructed:
    /// headers received and the frame stream handed over. Once frames
    /// reach the caller, mid-stream failure is not retried.
    pub async fn send_stream(
        &self,
        attempts: &[Backend],
        catalog_primary: Option<&str>,
        original_model: &str,
        body: &Value,
        ctx: &RequestContext,
        estimated_tokens: u32,
    ) -> Result<(FrameStream, String), LlmError> {
        if attempts.len() <= 1 {
            let backend = single_attempt(attempts)?;
            let outbound = with_model(body, &backend.model_id);
            let stream = self.dispatch.send_stream(backend, &outbound, ctx).await?;
            return Ok((stream, backend.model.clone()));
        }

        let mut cycle = 0u32;

        loop {
            'cycle: for backend in self.current_attempts(attempts, catalog_primary) {
                let outbound = with_model(body, &backend.model_id);

                match self.dispatch.send_stream(backend, &outbound, ctx).await {
                    Ok(stream) => return Ok((stream, backend.model.clone())),
                    Err(LlmError::ClientDisconnected) => return Err(LlmError::ClientDisconnected),
                    Err(error) => {
                        if self.handle_failure(backend, catalog_primary, original_model, estimated_tokens, &error) {
                            break 'cycle;
                        }
                    }
                }
            }

            cycle += 1;
            if cycle >= self.max_cycles {
                return Err(LlmError::AllBackendsFailed(self.max_cycles));
            }

            tokio::time::sleep(backoff_for_cycle(cycle)).await;
        }
    }

    /// The attempt list for this cycle: the configured primary drops out
    /// while its cooldown runs.
    fn current_attempts<'b>(
        &self,
        attempts: &'b [Backend],
        catalog_primary: Option<&str>,
    ) -> impl Iterator<Item = &'b Backend> {
        let suppress = match catalog_primary {
            Some(primary) if !self.state.primary_available() => Some(primary.to_string()),
            _ => None,
        };

        attempts
            .iter()
            .filter(move |backend| suppress.as_deref() != Some(backend.model.as_str()))
    }

    /// Classify a failed attempt. Returns true when the cycle should
    /// restart because the primary just entered cooldown.
    fn handle_failure(
        &self,
        backend: &Backend,
        catalog_primary: Option<&str>,
        original_model: &str,
        estimated_tokens: u32,
        error: &LlmError,
    ) -> bool {
        if catalog_primary == Some(backend.model.as_str()) && is_day_limit(error) {
            log::warn!(
                "primary '{}' hit its daily limit, cooling down for {}s",
                backend.model,
                PRIMARY_COOLDOWN.as_secs()
            );
            self.state.arm_primary_cooldown();
            return true;
        }

        log::warn!(
            "failover: backend '{}' failed (code {}) for request model '{original_model}' (~{estimated_tokens} tokens)",
            backend.model,
            error_code(error),
        );

        false
    }
}

fn single_attempt(attempts: &[Backend]) -> Result<&Backend, LlmError> {
    attempts
        .first()
        .ok_or_else(|| LlmError::Internal(Some("empty attempt list".to_string())))
}

fn backoff_for_cycle(completed_cycles: u32) -> Duration {
    let index = (completed_cycles as usize - 1).min(BACKOFF_SECONDS.len() - 1);
    Duration::from_secs(BACKOFF_SECONDS[index])
}

/// Set the payload model for one attempt; the caller's body is untouched.
fn with_model(body: &Value, model_id: &str) -> Value {
    let mut outbound = body.clone();
    if let Some(map) = outbound.as_object_mut() {
        map.insert("model".to_string(), Value::String(model_id.to_string()));
    }
    outbound
}

fn is_day_limit(error: &LlmError) -> bool {
    error.to_string().to_lowercase().contains(DAY_LIMIT_MARKER)
}

/// The code logged for a failed attempt: the HTTP status if there is
/// one, else a leading 3-digit number in the message, else the error
/// kind name.
fn error_code(error: &LlmError) -> String {
    if let LlmError::UpstreamHttp { status, .. } = error {
        return status.to_string();
    }

    let message = error.to_string();
    let digits: String = message.trim_start().chars().take_while(char::is_ascii_digit).collect();
    if digits.len() == 3 {
        return digits;
    }

    error.kind_name().to_string()
}
