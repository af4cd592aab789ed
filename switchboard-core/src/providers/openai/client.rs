//! OpenAI provider implementation

use super::types::{
    OpenAIErrorBody, OpenAIMessage, OpenAIRequest, OpenAIResponse, OpenAIStreamChunk,
    OpenAIStreamOptions, OpenAIUsage,
};
use crate::error::ErrorCode;
use crate::protocol::{ChatRequest, ModelInfo, Response, Role, StreamEvent, StreamRequest, UsageInfo};
use crate::providers::error::{retry_after_hint, ProviderError, ProviderResult};
use crate::providers::rate_limit::{RateLimitInfo, RateLimitTracker};
use crate::providers::sse::{body_stream, SseReader};
use crate::providers::{EventStream, Provider, ProviderConfig};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use reqwest::Client;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Base URL for the OpenAI API.
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

const PROVIDER: &str = "openai";

/// Payload the backend sends as its end-of-stream sentinel.
const DONE_SENTINEL: &str = "[DONE]";

/// Channel depth for in-flight stream events.
const EVENT_BUFFER: usize = 32;

/// Supported models: (id, display name, context window).
const SUPPORTED_MODELS: &[(&str, &str, u32)] = &[
    ("gpt-4o", "GPT-4o", 128_000),
    ("gpt-4o-mini", "GPT-4o mini", 128_000),
    ("gpt-4-turbo", "GPT-4 Turbo", 128_000),
    ("gpt-4", "GPT-4", 8_192),
    ("gpt-3.5-turbo", "GPT-3.5 Turbo", 16_385),
];

/// Adapter for OpenAI-protocol backends.
#[derive(Debug)]
pub struct OpenAIProvider {
    config: ProviderConfig,
    base_url: String,
    client: Client,
    rate_limits: RateLimitTracker,
}

impl OpenAIProvider {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        config.validate(PROVIDER)?;

        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| {
                ProviderError::generic(
                    PROVIDER,
                    "",
                    ErrorCode::ConfigInvalid,
                    format!("failed to build HTTP client: {err}"),
                )
            })?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| OPENAI_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            config,
            base_url,
            client,
            rate_limits: RateLimitTracker::new(),
        })
    }

    /// Current rate-limit snapshot for this instance.
    pub fn rate_limit_info(&self) -> RateLimitInfo {
        self.rate_limits.info()
    }

    fn supported_ids() -> Vec<String> {
        SUPPORTED_MODELS.iter().map(|(id, _, _)| id.to_string()).collect()
    }

    fn validate_model(&self, model: &str) -> ProviderResult<()> {
        if SUPPORTED_MODELS.iter().any(|(id, _, _)| *id == model) {
            return Ok(());
        }
        Err(ProviderError::invalid_model(PROVIDER, model, Self::supported_ids()))
    }

    fn check_rate_budget(&self) -> ProviderResult<()> {
        if let Some(wait) = self.rate_limits.should_wait() {
            return Err(ProviderError::rate_limit(PROVIDER, wait));
        }
        Ok(())
    }

    fn build_wire(&self, request: &ChatRequest, stream: bool) -> OpenAIRequest {
        let messages = request
            .messages
            .iter()
            .map(|msg| OpenAIMessage {
                role: match msg.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: msg.content.clone(),
            })
            .collect();

        OpenAIRequest {
            model: request.model.clone(),
            messages,
            stream,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            top_p: request.top_p,
            stop: request.stop_sequences.clone(),
            stream_options: stream.then_some(OpenAIStreamOptions { include_usage: true }),
        }
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> ProviderResult<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&self.build_wire(request, stream));

        if let Some(org) = &self.config.organization {
            builder = builder.header("OpenAI-Organization", org);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| ProviderError::from_reqwest(PROVIDER, err))?;

        self.rate_limits.update_from_headers(response.headers());

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = retry_after_hint(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.classify_error(status, retry_after, &body, &request.model));
        }

        Ok(response)
    }

    /// Classify a non-2xx response. Structured fields (status code, then
    /// the parsed error body's `type`) decide first; message substrings
    /// are a last resort and are flagged for telemetry when they decide.
    fn classify_error(
        &self,
        status: u16,
        retry_after: Duration,
        body: &str,
        model: &str,
    ) -> ProviderError {
        let Ok(parsed) = serde_json::from_str::<OpenAIErrorBody>(body) else {
            return ProviderError::from_status(PROVIDER, model, status, retry_after, body);
        };
        let detail = parsed.error;

        match status {
            401 | 403 => ProviderError::authentication(PROVIDER, detail.message),
            429 => ProviderError::rate_limit(PROVIDER, retry_after),
            400 => {
                if detail.kind == "context_length_exceeded" {
                    return ProviderError::context_length(PROVIDER, model, 0, 0);
                }
                if detail.message.contains("maximum context length") {
                    warn!(
                        fallback = "substring",
                        message = %detail.message,
                        "classified context-length error from message text"
                    );
                    return ProviderError::context_length(PROVIDER, model, 0, 0);
                }
                ProviderError::generic(
                    PROVIDER,
                    model,
                    ErrorCode::ProviderInvalidResponse,
                    format!("{}: {}", detail.kind, detail.message),
                )
            }
            404 if detail.message.contains("model") => {
                ProviderError::invalid_model(PROVIDER, model, Self::supported_ids())
            }
            _ => {
                let code = match status {
                    500..=599 => ErrorCode::ProviderUnavailable,
                    408 => ErrorCode::ProviderTimeout,
                    _ => ErrorCode::ProviderInvalidResponse,
                };
                ProviderError::generic(
                    PROVIDER,
                    model,
                    code,
                    format!("{}: {}", detail.kind, detail.message),
                )
            }
        }
    }

    fn parse_response(&self, wire: OpenAIResponse, model: &str) -> ProviderResult<Response> {
        let choice = wire.choices.into_iter().next().ok_or_else(|| {
            ProviderError::generic(
                PROVIDER,
                model,
                ErrorCode::ProviderInvalidResponse,
                "no choices in response",
            )
        })?;

        let usage = wire.usage.map(usage_from_wire);
        if let Some(usage) = &usage {
            self.rate_limits.record_request(usage.total_tokens);
        } else {
            self.rate_limits.record_request(0);
        }

        Ok(Response {
            content: choice.message.content.unwrap_or_default(),
            model: if wire.model.is_empty() {
                model.to_string()
            } else {
                wire.model
            },
            provider: PROVIDER.to_string(),
            finish_reason: choice.finish_reason.unwrap_or_default(),
            usage,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        })
    }
}

fn usage_from_wire(wire: OpenAIUsage) -> UsageInfo {
    UsageInfo {
        prompt_tokens: wire.prompt_tokens,
        completion_tokens: wire.completion_tokens,
        total_tokens: wire.total_tokens,
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn chat(&self, request: &ChatRequest) -> ProviderResult<Response> {
        self.validate_model(&request.model)?;
        self.check_rate_budget()?;

        let response = self.send(request, false).await?;
        let wire: OpenAIResponse = response.json().await.map_err(|err| {
            ProviderError::generic(
                PROVIDER,
                &request.model,
                ErrorCode::ProviderInvalidResponse,
                format!("failed to parse response: {err}"),
            )
        })?;

        self.parse_response(wire, &request.model)
    }

    async fn stream(
        &self,
        request: &StreamRequest,
        cancel: CancellationToken,
    ) -> ProviderResult<EventStream> {
        self.validate_model(&request.model)?;
        self.check_rate_budget()?;

        let response = self.send(request, true).await?;
        self.rate_limits.record_request(0);

        let reader = SseReader::new(body_stream(PROVIDER, response.bytes_stream()));
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(run_stream(reader, tx, cancel));

        Ok(rx)
    }

    async fn models(&self) -> ProviderResult<Vec<ModelInfo>> {
        Ok(SUPPORTED_MODELS
            .iter()
            .map(|(id, name, max_tokens)| ModelInfo {
                id: id.to_string(),
                name: name.to_string(),
                provider: PROVIDER.to_string(),
                max_tokens: *max_tokens,
                capabilities: vec!["chat".to_string(), "streaming".to_string()],
            })
            .collect())
    }

    async fn close(&self) -> ProviderResult<()> {
        debug!(provider = PROVIDER, "closed provider");
        Ok(())
    }
}

/// Producer task: reads SSE events and feeds the caller's channel. Exits on
/// the terminal event, on cancellation, or when the receiver is dropped.
async fn run_stream<S>(
    mut reader: SseReader<S>,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) where
    S: Stream<Item = ProviderResult<Bytes>> + Unpin,
{
    if tx.send(StreamEvent::message_start()).await.is_err() {
        return;
    }
    if tx.send(StreamEvent::content_start()).await.is_err() {
        return;
    }

    let mut accumulated = String::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = tx.send(StreamEvent::error(ProviderError::cancelled(PROVIDER))).await;
                return;
            }
            next = reader.next_event() => next,
        };

        match next {
            Err(err) => {
                let _ = tx.send(StreamEvent::error(err)).await;
                return;
            }
            Ok(None) => {
                let _ = tx
                    .send(StreamEvent::error(ProviderError::invalid_response(
                        PROVIDER,
                        "stream ended without completion",
                    )))
                    .await;
                return;
            }
            Ok(Some(event)) => {
                if event.data == DONE_SENTINEL {
                    let _ = tx.send(StreamEvent::message_stop(accumulated)).await;
                    return;
                }

                let chunk: OpenAIStreamChunk = match serde_json::from_str(&event.data) {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        warn!(provider = PROVIDER, %err, "skipping unparseable stream chunk");
                        continue;
                    }
                };

                if let Some(usage) = chunk.usage {
                    if tx
                        .send(StreamEvent::usage(usage_from_wire(usage)))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }

                let Some(choice) = chunk.choices.into_iter().next() else {
                    continue;
                };

                if choice.finish_reason.as_deref().is_some_and(|r| !r.is_empty()) {
                    let _ = tx.send(StreamEvent::message_stop(accumulated)).await;
                    return;
                }

                if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
                    accumulated.push_str(&text);
                    if tx.send(StreamEvent::text_delta(text)).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
