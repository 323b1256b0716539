// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Ollama backend
//!
//! Talks to a local Ollama server through `/api/chat`, which answers with
//! newline-delimited JSON objects. The object with `done: true` carries the
//! token counts and ends the turn.

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

use super::common::{drain_lines, extend_buffer, stream_error};

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Ollama backend
pub struct OllamaBackend {
    client: Client,
    base_url: String,
}

impl OllamaBackend {
    /// Create a new backend with the default base URL
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_URL)
    }

    /// Create with a custom base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// List models pulled into the local server
    pub async fn list_local_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_connect() {
                PalaverError::Api(ApiError::Network(
                    "Ollama is not running. Start the Ollama app or run 'ollama serve'".to_string(),
                ))
            } else {
                PalaverError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(PalaverError::Api(ApiError::ServerError {
                status: response.status().as_u16(),
                message: "Failed to list models".to_string(),
            }));
        }

        let body: OllamaTagsResponse = response.json().await?;
        Ok(body.models.into_iter().map(|m| m.name).collect())
    }

    fn convert_messages(&self, messages: &[Message], system: Option<&str>) -> Vec<OllamaMessage> {
        system
            .map(|sys| OllamaMessage {
                role: "system".to_string(),
                content: sys.to_string(),
                thinking: None,
                tool_calls: None,
            })
            .into_iter()
            .chain(messages.iter().map(|m| OllamaMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
                thinking: None,
                tool_calls: None,
            }))
            .collect()
    }

    fn convert_tools(&self, tools: &[ToolDefinition]) -> Vec<OllamaTool> {
        tools
            .iter()
            .map(|t| OllamaTool {
                tool_type: "function".to_string(),
                function: OllamaFunction {
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

    fn build_request(&self, request: &ChatRequest) -> OllamaRequest {
        OllamaRequest {
            model: request.model.clone(),
            messages: self.convert_messages(&request.messages, request.system.as_deref()),
            stream: request.stream,
            options: Some(OllamaOptions {
                temperature: Some(request.temperature),
                num_predict: Some(request.max_tokens as i64),
            }),
            tools: if request.tools.is_empty() {
                None
            } else {
                Some(self.convert_tools(&request.tools))
            },
        }
    }

    /// Parse an error response
    fn parse_error(&self, status: u16, body: &str) -> PalaverError {
        if let Ok(error_response) = serde_json::from_str::<OllamaError>(body) {
            let message = error_response.error;
            if message.contains("model") && message.contains("not found") {
                PalaverError::Api(ApiError::ModelNotFound(message))
            } else {
                PalaverError::Api(ApiError::ServerError { status, message })
            }
        } else {
            PalaverError::Api(ApiError::ServerError {
                status,
                message: body.to_string(),
            })
        }
    }
}

impl Default for OllamaBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-stream parser state
#[derive(Debug, Default)]
struct NdjsonState {
    buffer: Vec<u8>,
    message_started: bool,
    tool_count: usize,
}

impl NdjsonState {
    /// Buffer a body chunk and parse every complete line in it
    fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        extend_buffer(&mut self.buffer, bytes);
        // A non-streamed reply may arrive without a trailing newline.
        if self.buffer.last().is_some_and(|b| *b != b'\n')
            && serde_json::from_slice::<serde_json::Value>(&self.buffer).is_ok()
        {
            self.buffer.push(b'\n');
        }

        drain_lines(&mut self.buffer)
            .iter()
            .flat_map(|line| self.parse_line(line))
            .collect()
    }

    fn parse_line(&mut self, line: &str) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if let Ok(error) = serde_json::from_str::<OllamaError>(line) {
            events.push(StreamEvent::Error {
                error_type: "ollama_error".to_string(),
                message: error.error,
            });
            return events;
        }

        let Ok(chunk) = serde_json::from_str::<OllamaStreamResponse>(line) else {
            return events;
        };

        if !self.message_started {
            self.message_started = true;
            events.push(StreamEvent::MessageStart {
                id: String::new(),
                model: chunk.model.clone().unwrap_or_default(),
            });
        }

        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
                events.push(StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: ContentBlockDelta::ThinkingDelta { thinking },
                });
            }
            if !message.content.is_empty() {
                events.push(StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: ContentBlockDelta::TextDelta {
                        text: message.content,
                    },
                });
            }
            // Ollama delivers each tool call whole, never as partial JSON.
            for call in message.tool_calls.unwrap_or_default() {
                self.tool_count += 1;
                let index = self.tool_count;
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlockResponse::ToolUse {
                        id: format!("call_{}", index),
                        name: call.function.name,
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentBlockDelta::InputJsonDelta {
                        partial_json: call.function.arguments.to_string(),
                    },
                });
                events.push(StreamEvent::ContentBlockStop { index });
            }
        }

        if chunk.done {
            let stop_reason = match chunk.done_reason.as_deref() {
                Some("length") => StopReason::MaxTokens,
                _ if self.tool_count > 0 => StopReason::ToolUse,
                _ => StopReason::EndTurn,
            };
            events.push(StreamEvent::MessageDelta {
                stop_reason: Some(stop_reason),
                usage: Some(Usage {
                    input_tokens: chunk.prompt_eval_count.unwrap_or(0).max(0) as u32,
                    output_tokens: chunk.eval_count.unwrap_or(0).max(0) as u32,
                }),
            });
            events.push(StreamEvent::MessageStop);
        }

        events
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn is_ready(&self) -> bool {
        !self.base_url.is_empty()
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<EventStream> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request(&request);

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_connect() {
                PalaverError::Api(ApiError::Network(
                    "Ollama is not running. Start the Ollama app or run 'ollama serve'".to_string(),
                ))
            } else {
                PalaverError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status, &body));
        }

        let event_stream = response
            .bytes_stream()
            .map(|result| result.map_err(stream_error))
            .scan(NdjsonState::default(), |state, result| {
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

// Ollama API types

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OllamaTool>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thinking: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<i64>,
}

#[derive(Debug, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OllamaFunction,
}

#[derive(Debug, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OllamaStreamResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    message: Option<OllamaMessage>,
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<i64>,
    #[serde(default)]
    eval_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct OllamaError {
    error: String,
}

#[derive(Debug, Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: String,
}
