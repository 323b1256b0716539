// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI-compatible chat completions backend
//!
//! Serves every provider that speaks the `/chat/completions` dialect: OpenAI,
//! Azure deployments, Google's compatibility endpoint, Mistral, Moonshot,
//! DeepSeek, Grok, OpenRouter and LM Studio. Reasoning deltas arrive as
//! `reasoning_content` (DeepSeek) or `reasoning` (OpenRouter).

use std::collections::HashSet;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, PalaverError, Result};
use crate::llm::message::Message;
use crate::llm::provider::{
    ChatBackend, ChatRequest, ContentBlockDelta, ContentBlockResponse, EventStream, StopReason,
    StreamEvent, ToolDefinition, Usage,
};

use super::common::{
    drain_lines, extend_buffer, parse_retry_after_seconds, status_error, stream_error,
};

/// How the API key is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `api-key: <key>` (Azure)
    ApiKeyHeader,
}

/// Backend for OpenAI-compatible endpoints
pub struct OpenAiCompatibleBackend {
    client: Client,
    name: String,
    api_key: Option<String>,
    base_url: String,
    requires_api_key: bool,
    auth: AuthStyle,
    api_version: Option<String>,
    stream_usage: bool,
}

impl OpenAiCompatibleBackend {
    /// Create a backend for `name` at `base_url` (without `/chat/completions`)
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            name: name.into(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            requires_api_key: true,
            auth: AuthStyle::Bearer,
            api_version: None,
            stream_usage: false,
        }
    }

    /// Local servers accept anonymous requests
    pub fn without_api_key(mut self) -> Self {
        self.requires_api_key = false;
        self
    }

    /// Azure deployment: `api-key` header plus `api-version` query
    pub fn azure(mut self, api_version: impl Into<String>) -> Self {
        self.auth = AuthStyle::ApiKeyHeader;
        self.api_version = Some(api_version.into());
        self
    }

    /// Ask for a trailing usage chunk on streamed responses
    pub fn with_stream_usage(mut self) -> Self {
        self.stream_usage = true;
        self
    }

    fn endpoint(&self) -> String {
        match &self.api_version {
            Some(version) => format!("{}/chat/completions?api-version={}", self.base_url, version),
            None => format!("{}/chat/completions", self.base_url),
        }
    }

    fn convert_messages(&self, messages: &[Message], system: Option<&str>) -> Vec<WireMessage> {
        let mut result = Vec::with_capacity(messages.len() + 1);
        if let Some(sys) = system {
            result.push(WireMessage {
                role: "system".to_string(),
                content: sys.to_string(),
            });
        }
        result.extend(messages.iter().map(|m| WireMessage {
            role: m.role.as_str().to_string(),
            content: m.content.clone(),
        }));
        result
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<WireTool> {
        tools
            .iter()
            .map(|t| WireTool {
                r#type: "function".to_string(),
                function: WireFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: serde_json::json!({
                        "type": t.input_schema.schema_type,
                        "properties": t.input_schema.properties,
                        "required": t.input_schema.required,
                    }),
                },
            })
            .collect()
    }

    fn build_request(&self, request: &ChatRequest) -> WireRequest {
        WireRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages, request.system.as_deref()),
            max_tokens: Some(request.max_tokens),
            temperature: Some(request.temperature),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
            stream: request.stream,
            stream_options: if request.stream && self.stream_usage {
                Some(StreamOptions {
                    include_usage: true,
                })
            } else {
                None
            },
        }
    }

    /// Parse an error response
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> PalaverError {
        let Ok(error_response) = serde_json::from_str::<WireError>(body) else {
            return status_error(status, body.to_string(), retry_after);
        };
        let message = error_response.error.message;
        let code = error_response
            .error
            .code
            .as_ref()
            .and_then(|c| c.as_str().map(str::to_string))
            .or(error_response.error.error_type)
            .unwrap_or_default();

        match code.as_str() {
            "invalid_api_key" | "authentication_error" => {
                PalaverError::Api(ApiError::AuthenticationFailed)
            }
            "rate_limit_exceeded" => {
                PalaverError::Api(ApiError::RateLimited(retry_after.unwrap_or(60) as u32))
            }
            "model_not_found" => PalaverError::Api(ApiError::ModelNotFound(message)),
            _ => status_error(status, message, retry_after),
        }
    }

    /// Turn a non-streamed response into the same event sequence a stream would produce.
    fn response_events(response: WireResponse) -> Result<Vec<StreamEvent>> {
        let choice = response.choices.into_iter().next().ok_or_else(|| {
            PalaverError::Api(ApiError::InvalidResponse("No choices in response".to_string()))
        })?;

        let mut events = vec![StreamEvent::MessageStart {
            id: response.id,
            model: response.model.unwrap_or_default(),
        }];

        if let Some(reasoning) = choice.message.reasoning_content.or(choice.message.reasoning) {
            if !reasoning.is_empty() {
                events.push(StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: ContentBlockDelta::ThinkingDelta {
                        thinking: reasoning,
                    },
                });
            }
        }
        if let Some(text) = choice.message.content {
            if !text.is_empty() {
                events.push(StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: ContentBlockDelta::TextDelta { text },
                });
            }
        }
        for (i, tc) in choice.message.tool_calls.unwrap_or_default().into_iter().enumerate() {
            let index = i + 1;
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ContentBlockResponse::ToolUse {
                    id: tc.id.unwrap_or_else(|| format!("tool_{}", i)),
                    name: tc.function.name.unwrap_or_default(),
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
            });
            if let Some(arguments) = tc.function.arguments {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::InputJsonDelta {
                        partial_json: arguments,
                    },
                });
            }
            events.push(StreamEvent::ContentBlockStop { index });
        }

        events.push(StreamEvent::MessageDelta {
            stop_reason: choice
                .finish_reason
                .as_deref()
                .map(StopReason::from_finish_reason),
            usage: response.usage.map(Into::into),
        });
        events.push(StreamEvent::MessageStop);
        Ok(events)
    }
}

#[async_trait]
impl ChatBackend for OpenAiCompatibleBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        !self.base_url.is_empty() && (!self.requires_api_key || self.api_key.is_some())
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<EventStream> {
        if !self.is_ready() {
            return Err(PalaverError::Config(format!(
                "{} is not configured: missing API key or endpoint",
                self.name
            )));
        }

        let body = self.build_request(&request);
        let mut req = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json");
        if let Some(ref key) = self.api_key {
            req = match self.auth {
                AuthStyle::Bearer => req.header("Authorization", format!("Bearer {}", key)),
                AuthStyle::ApiKeyHeader => req.header("api-key", key),
            };
        }

        let response = req.json(&body).send().await?;
        let status = response.status().as_u16();

        if !response.status().is_success() {
            let retry_after = parse_retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body, retry_after));
        }

        if !request.stream {
            let parsed: WireResponse = response.json().await?;
            let events = Self::response_events(parsed)?;
            return Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))));
        }

        let event_stream = response
            .bytes_stream()
            .map(|result| result.map_err(stream_error))
            .scan(StreamState::default(), |state, result| {
                let events: Vec<Result<StreamEvent>> = match result {
                    Ok(bytes) => state.feed(&bytes).into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Per-stream parser state
#[derive(Debug, Default)]
struct StreamState {
    buffer: Vec<u8>,
    message_started: bool,
    started_tools: HashSet<usize>,
}

impl StreamState {
    /// Buffer a body chunk and parse every complete `data:` line in it
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        extend_buffer(&mut self.buffer, bytes);
        let mut events = Vec::new();
        for line in drain_lines(&mut self.buffer) {
            if line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                events.extend(self.parse_data(data.trim()));
            }
        }
        events
    }

    fn parse_data(&mut self, data: &str) -> Vec<StreamEvent> {
        if data == "[DONE]" {
            return vec![StreamEvent::MessageStop];
        }

        let mut events = Vec::new();
        let chunk = match serde_json::from_str::<WireStreamChunk>(data) {
            Ok(chunk) => chunk,
            Err(_) => return events,
        };

        if let Some(error) = chunk.error {
            events.push(StreamEvent::Error {
                error_type: error.error_type.unwrap_or_else(|| "error".to_string()),
                message: error.message,
            });
            return events;
        }

        if !self.message_started {
            self.message_started = true;
            events.push(StreamEvent::MessageStart {
                id: chunk.id.clone().unwrap_or_default(),
                model: chunk.model.clone().unwrap_or_default(),
            });
        }

        let usage: Option<Usage> = chunk.usage.map(Into::into);
        let mut usage_emitted = false;

        if let Some(choice) = chunk.choices.into_iter().next() {
            let delta = choice.delta;

            if let Some(reasoning) = delta.reasoning_content.or(delta.reasoning) {
                if !reasoning.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index: 0,
                        delta: ContentBlockDelta::ThinkingDelta {
                            thinking: reasoning,
                        },
                    });
                }
            }

            if let Some(text) = delta.content {
                if !text.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index: 0,
                        delta: ContentBlockDelta::TextDelta { text },
                    });
                }
            }

            for tc in delta.tool_calls.unwrap_or_default() {
                // Block 0 is the text block; tool calls follow it.
                let index = tc.index.unwrap_or(0) + 1;
                if self.started_tools.insert(index) {
                    events.push(StreamEvent::ContentBlockStart {
                        index,
                        content_block: ContentBlockResponse::ToolUse {
                            id: tc.id.clone().unwrap_or_else(|| format!("tool_{}", index - 1)),
                            name: tc.function.name.clone().unwrap_or_default(),
                            input: serde_json::Value::Object(serde_json::Map::new()),
                        },
                    });
                }
                if let Some(arguments) = tc.function.arguments {
                    if !arguments.is_empty() {
                        events.push(StreamEvent::ContentBlockDelta {
                            index,
                            delta: ContentBlockDelta::InputJsonDelta {
                                partial_json: arguments,
                            },
                        });
                    }
                }
            }

            if let Some(finish_reason) = choice.finish_reason {
                let mut open: Vec<usize> = self.started_tools.drain().collect();
                open.sort_unstable();
                events.extend(open.into_iter().map(|index| StreamEvent::ContentBlockStop { index }));
                events.push(StreamEvent::MessageDelta {
                    stop_reason: Some(StopReason::from_finish_reason(&finish_reason)),
                    usage,
                });
                usage_emitted = true;
            }
        }

        if !usage_emitted && usage.is_some() {
            events.push(StreamEvent::MessageDelta {
                stop_reason: None,
                usage,
            });
        }

        events
    }
}

// OpenAI-compatible wire types

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    error: Option<WireErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WireFunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl From<WireUsage> for Usage {
    fn from(usage: WireUsage) -> Self {
        Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    error_type: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}
