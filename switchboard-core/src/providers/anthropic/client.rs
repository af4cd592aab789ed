//! Anthropic provider implementation

use super::types::{
    AnthropicContent, AnthropicErrorBody, AnthropicErrorDetail, AnthropicMessage,
    AnthropicRequest, AnthropicResponse, ContentBlockDeltaPayload, MessageDeltaPayload,
    MessageStartPayload,
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

/// Base URL for the Anthropic API.
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";

/// Value of the required `anthropic-version` header.
const ANTHROPIC_VERSION: &str = "2023-06-01";

const PROVIDER: &str = "anthropic";

/// The Messages API requires `max_tokens`; used when the caller sets none.
const DEFAULT_MAX_TOKENS: u32 = 4096;

const EVENT_BUFFER: usize = 32;

/// Supported models: (id, display name, context window).
const SUPPORTED_MODELS: &[(&str, &str, u32)] = &[
    ("claude-sonnet-4-5", "Claude Sonnet 4.5", 200_000),
    ("claude-haiku-4-5", "Claude Haiku 4.5", 200_000),
    ("claude-opus-4-1", "Claude Opus 4.1", 200_000),
];

/// Adapter for the Anthropic Messages API.
pub struct AnthropicProvider {
    config: ProviderConfig,
    base_url: String,
    client: Client,
    rate_limits: RateLimitTracker,
}

impl AnthropicProvider {
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
            .unwrap_or_else(|| ANTHROPIC_API_URL.to_string())
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

    /// System messages travel in a dedicated request field, joined in
    /// order; the rest of the conversation keeps its sequence.
    fn build_wire(&self, request: &ChatRequest, stream: bool) -> AnthropicRequest {
        let mut system_parts: Vec<&str> = Vec::new();
        let mut messages = Vec::new();

        for msg in &request.messages {
            match msg.role {
                Role::System => system_parts.push(&msg.content),
                Role::User | Role::Assistant => messages.push(AnthropicMessage {
                    role: if msg.role == Role::User { "user" } else { "assistant" },
                    content: vec![AnthropicContent {
                        kind: "text",
                        text: msg.content.clone(),
                    }],
                }),
            }
        }

        AnthropicRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            stream,
            system: (!system_parts.is_empty()).then(|| system_parts.join("\n\n")),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop_sequences.clone(),
        }
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> ProviderResult<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.build_wire(request, stream))
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

    fn classify_error(
        &self,
        status: u16,
        retry_after: Duration,
        body: &str,
        model: &str,
    ) -> ProviderError {
        let Ok(parsed) = serde_json::from_str::<AnthropicErrorBody>(body) else {
            return ProviderError::from_status(PROVIDER, model, status, retry_after, body);
        };
        convert_api_error(parsed.error, retry_after, model)
    }

    fn parse_response(&self, wire: AnthropicResponse, model: &str) -> Response {
        let content = wire
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        // The backend reports input and output separately; the total is
        // their documented sum and is set here, not derived downstream.
        let usage = wire.usage.map(|u| UsageInfo {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });
        if let Some(usage) = &usage {
            self.rate_limits.record_request(usage.total_tokens);
        } else {
            self.rate_limits.record_request(0);
        }

        Response {
            content,
            model: if wire.model.is_empty() {
                model.to_string()
            } else {
                wire.model
            },
            provider: PROVIDER.to_string(),
            finish_reason: wire.stop_reason.unwrap_or_default(),
            usage,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }
}

/// Map the backend's structured error type to the shared taxonomy.
/// Substring checks on the message are the fallback of last resort.
fn convert_api_error(detail: AnthropicErrorDetail, retry_after: Duration, model: &str) -> ProviderError {
    match detail.kind.as_str() {
        "authentication_error" | "permission_error" => {
            ProviderError::authentication(PROVIDER, detail.message)
        }
        "rate_limit_error" => ProviderError::rate_limit(PROVIDER, retry_after),
        "not_found_error" => {
            ProviderError::invalid_model(PROVIDER, model, AnthropicProvider::supported_ids())
        }
        "invalid_request_error" => {
            if detail.message.contains("prompt is too long")
                || detail.message.contains("maximum context length")
            {
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
                format!("invalid request: {}", detail.message),
            )
        }
        "overloaded_error" => ProviderError::generic(
            PROVIDER,
            model,
            ErrorCode::ProviderUnavailable,
            detail.message,
        ),
        _ => ProviderError::generic(
            PROVIDER,
            model,
            ErrorCode::ProviderInvalidResponse,
            format!("{}: {}", detail.kind, detail.message),
        ),
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn chat(&self, request: &ChatRequest) -> ProviderResult<Response> {
        self.validate_model(&request.model)?;
        self.check_rate_budget()?;

        let response = self.send(request, false).await?;
        let wire: AnthropicResponse = response.json().await.map_err(|err| {
            ProviderError::generic(
                PROVIDER,
                &request.model,
                ErrorCode::ProviderInvalidResponse,
                format!("failed to parse response: {err}"),
            )
        })?;

        Ok(self.parse_response(wire, &request.model))
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
        let model = request.model.clone();
        tokio::spawn(run_stream(model, reader, tx, cancel));

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
                capabilities: vec![
                    "chat".to_string(),
                    "streaming".to_string(),
                    "thinking".to_string(),
                ],
            })
            .collect())
    }

    async fn close(&self) -> ProviderResult<()> {
        debug!(provider = PROVIDER, "closed provider");
        Ok(())
    }
}

/// Producer task for the Messages stream protocol.
async fn run_stream<S>(
    model: String,
    mut reader: SseReader<S>,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) where
    S: Stream<Item = ProviderResult<Bytes>> + Unpin,
{
    let mut accumulated = String::new();
    let mut prompt_tokens: u32 = 0;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = tx.send(StreamEvent::error(ProviderError::cancelled(PROVIDER))).await;
                return;
            }
            next = reader.next_event() => next,
        };

        let event = match next {
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
            Ok(Some(event)) => event,
        };

        match event.event_type.as_str() {
            "message_start" => {
                if let Ok(payload) = serde_json::from_str::<MessageStartPayload>(&event.data) {
                    if let Some(usage) = payload.message.usage {
                        prompt_tokens = usage.input_tokens;
                    }
                }
                if tx.send(StreamEvent::message_start()).await.is_err() {
                    return;
                }
            }
            "content_block_start" => {
                if tx.send(StreamEvent::content_start()).await.is_err() {
                    return;
                }
            }
            "content_block_delta" => {
                let payload: ContentBlockDeltaPayload = match serde_json::from_str(&event.data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(provider = PROVIDER, %err, "skipping unparseable stream chunk");
                        continue;
                    }
                };
                let out = match payload.delta.kind.as_str() {
                    "text_delta" if !payload.delta.text.is_empty() => {
                        accumulated.push_str(&payload.delta.text);
                        StreamEvent::text_delta(payload.delta.text)
                    }
                    "thinking_delta" if !payload.delta.thinking.is_empty() => {
                        StreamEvent::thinking(payload.delta.thinking)
                    }
                    _ => continue,
                };
                if tx.send(out).await.is_err() {
                    return;
                }
            }
            "content_block_stop" => {
                if tx.send(StreamEvent::content_end(accumulated.clone())).await.is_err() {
                    return;
                }
            }
            "message_delta" => {
                let payload: MessageDeltaPayload = match serde_json::from_str(&event.data) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(provider = PROVIDER, %err, "skipping unparseable stream chunk");
                        continue;
                    }
                };
                if let Some(usage) = payload.usage {
                    let completion = usage.output_tokens;
                    let out = StreamEvent::usage(UsageInfo {
                        prompt_tokens,
                        completion_tokens: completion,
                        total_tokens: prompt_tokens + completion,
                    });
                    if tx.send(out).await.is_err() {
                        return;
                    }
                }
            }
            "message_stop" => {
                let _ = tx.send(StreamEvent::message_stop(accumulated)).await;
                return;
            }
            "error" => {
                let err = match serde_json::from_str::<AnthropicErrorBody>(&event.data) {
                    Ok(body) => convert_api_error(body.error, Duration::ZERO, &model),
                    Err(_) => ProviderError::invalid_response(
                        PROVIDER,
                        format!("stream error: {}", event.data),
                    ),
                };
                let _ = tx.send(StreamEvent::error(err)).await;
                return;
            }
            // ping and future event kinds are transport detail
            _ => {}
        }
    }
}
