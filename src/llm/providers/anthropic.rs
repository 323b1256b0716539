// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Anthropic Messages API backend
//!
//! Streams typed SSE frames (`event:` + `data:`) including extended-thinking
//! deltas, which are surfaced on the reasoning channel.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, PalaverError, Result};
use crate::llm::message::{Message, Role};
use crate::llm::provider::{
    ChatBackend, ChatRequest, ContentBlockDelta, ContentBlockResponse, EventStream, StopReason,
    StreamEvent, ToolDefinition, Usage,
};

use super::common::{
    drain_frames, extend_buffer, parse_numeric_token_counts, parse_retry_after_seconds,
    stream_error,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic backend
pub struct AnthropicBackend {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl AnthropicBackend {
    /// Create a backend against the public endpoint
    pub fn new(api_key: Option<String>) -> Self {
        Self::with_base_url(api_key, ANTHROPIC_API_URL)
    }

    /// Create with a custom base URL (without the `/messages` suffix)
    pub fn with_base_url(api_key: Option<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    fn convert_messages(&self, messages: &[Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| AnthropicMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<AnthropicTool> {
        tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: serde_json::json!({
                    "type": t.input_schema.schema_type,
                    "properties": t.input_schema.properties,
                    "required": t.input_schema.required,
                }),
            })
            .collect()
    }

    fn build_request(&self, request: &ChatRequest) -> AnthropicRequest {
        // System messages in the list are folded into the system prompt.
        let mut system_parts: Vec<String> = request.system.iter().cloned().collect();
        system_parts.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| m.content.clone()),
        );

        AnthropicRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages),
            system: if system_parts.is_empty() {
                None
            } else {
                Some(system_parts.join("\n\n"))
            },
            max_tokens: request.max_tokens,
            temperature: Some(request.temperature),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
            stream: true,
        }
    }

    /// Parse an error response
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<u64>) -> PalaverError {
        if let Ok(error_response) = serde_json::from_str::<AnthropicError>(body) {
            let message = error_response.error.message;
            match error_response.error.error_type.as_str() {
                "authentication_error" | "permission_error" => {
                    PalaverError::Api(ApiError::AuthenticationFailed)
                }
                "rate_limit_error" => {
                    PalaverError::Api(ApiError::RateLimited(retry_after.unwrap_or(10) as u32))
                }
                "not_found_error" => PalaverError::Api(ApiError::ModelNotFound(message)),
                "invalid_request_error" => {
                    if message.contains("context")
                        || message.contains("too long")
                        || message.contains("tokens") && message.contains("maximum")
                    {
                        let (current, limit) = parse_numeric_token_counts(&message);
                        PalaverError::Api(ApiError::ContextTooLong { current, limit })
                    } else {
                        PalaverError::Api(ApiError::InvalidResponse(message))
                    }
                }
                _ => PalaverError::Api(ApiError::ServerError { status, message }),
            }
        } else {
            PalaverError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }
}

#[async_trait]
impl ChatBackend for AnthropicBackend {
    fn name(&self) -> &str {
        "Anthropic"
    }

    fn is_ready(&self) -> bool {
        self.api_key.is_some() && !self.base_url.is_empty()
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<EventStream> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            PalaverError::Config(
                "No Anthropic API key found. Set ANTHROPIC_API_KEY or add it to settings."
                    .to_string(),
            )
        })?;
        let body = self.build_request(&request);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();

        if !response.status().is_success() {
            let retry_after = parse_retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body, retry_after));
        }

        let event_stream = response
            .bytes_stream()
            .map(|result| result.map_err(stream_error))
            .scan(Vec::new(), |buffer, result| {
                let bytes = match result {
                    Ok(bytes) => bytes,
                    Err(e) => return futures::future::ready(Some(vec![Err(e)])),
                };
                let events: Vec<Result<StreamEvent>> = parse_sse_chunk(buffer, &bytes)
                    .into_iter()
                    .map(Ok)
                    .collect();
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Buffer a body chunk and parse every complete frame in it
fn parse_sse_chunk(buffer: &mut Vec<u8>, bytes: &[u8]) -> Vec<StreamEvent> {
    extend_buffer(buffer, bytes);
    drain_frames(buffer)
        .iter()
        .flat_map(|frame| parse_sse_event(frame))
        .collect()
}

/// Parse one Server-Sent Event frame.
///
/// `message_start` carries the prompt token count, so it expands into a
/// start event followed by a usage delta.
fn parse_sse_event(event_str: &str) -> Vec<StreamEvent> {
    let mut event_type = None;
    let mut data = None;

    for line in event_str.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_type = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data = Some(rest.trim().to_string());
        }
    }

    let (Some(event_type), Some(data)) = (event_type, data) else {
        return Vec::new();
    };
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(&data) else {
        return Vec::new();
    };

    match event_type.as_str() {
        "message_start" => {
            let message = &parsed["message"];
            let mut events = vec![StreamEvent::MessageStart {
                id: message["id"].as_str().unwrap_or_default().to_string(),
                model: message["model"].as_str().unwrap_or_default().to_string(),
            }];
            if let Some(input) = message["usage"]["input_tokens"].as_u64() {
                events.push(StreamEvent::MessageDelta {
                    stop_reason: None,
                    usage: Some(Usage {
                        input_tokens: input as u32,
                        output_tokens: 0,
                    }),
                });
            }
            events
        }
        "content_block_start" => {
            let Some(index) = parsed["index"].as_u64() else {
                return Vec::new();
            };
            let block = &parsed["content_block"];

            let content_block = match block["type"].as_str() {
                Some("text") => ContentBlockResponse::Text {
                    text: block["text"].as_str().unwrap_or("").to_string(),
                },
                Some("thinking") => ContentBlockResponse::Thinking {
                    thinking: block["thinking"].as_str().unwrap_or("").to_string(),
                },
                Some("tool_use") => ContentBlockResponse::ToolUse {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    input: serde_json::Value::Object(serde_json::Map::new()),
                },
                _ => return Vec::new(),
            };

            vec![StreamEvent::ContentBlockStart {
                index: index as usize,
                content_block,
            }]
        }
        "content_block_delta" => {
            let Some(index) = parsed["index"].as_u64() else {
                return Vec::new();
            };
            let delta = &parsed["delta"];

            let delta = match delta["type"].as_str() {
                Some("text_delta") => ContentBlockDelta::TextDelta {
                    text: delta["text"].as_str().unwrap_or_default().to_string(),
                },
                Some("thinking_delta") => ContentBlockDelta::ThinkingDelta {
                    thinking: delta["thinking"].as_str().unwrap_or_default().to_string(),
                },
                Some("input_json_delta") => ContentBlockDelta::InputJsonDelta {
                    partial_json: delta["partial_json"].as_str().unwrap_or_default().to_string(),
                },
                _ => return Vec::new(),
            };

            vec![StreamEvent::ContentBlockDelta {
                index: index as usize,
                delta,
            }]
        }
        "content_block_stop" => parsed["index"]
            .as_u64()
            .map(|index| StreamEvent::ContentBlockStop {
                index: index as usize,
            })
            .into_iter()
            .collect(),
        "message_delta" => {
            let stop_reason = parsed["delta"]["stop_reason"].as_str().map(|r| match r {
                "max_tokens" => StopReason::MaxTokens,
                "tool_use" => StopReason::ToolUse,
                "stop_sequence" => StopReason::StopSequence,
                _ => StopReason::EndTurn,
            });

            let usage = parsed.get("usage").map(|u| Usage {
                input_tokens: u["input_tokens"].as_u64().unwrap_or(0) as u32,
                output_tokens: u["output_tokens"].as_u64().unwrap_or(0) as u32,
            });

            vec![StreamEvent::MessageDelta { stop_reason, usage }]
        }
        "message_stop" => vec![StreamEvent::MessageStop],
        "ping" => vec![StreamEvent::Ping],
        "error" => vec![StreamEvent::Error {
            error_type: parsed["error"]["type"]
                .as_str()
                .unwrap_or("error")
                .to_string(),
            message: parsed["error"]["message"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        }],
        _ => Vec::new(),
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorDetail,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}
