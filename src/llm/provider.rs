// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat backend trait and related types
//!
//! Every provider-specific client turns a `ChatRequest` into an ordered stream
//! of `StreamEvent`s. The streaming session consumes that stream without
//! knowing which vendor produced it.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;
use crate::llm::message::Message;

/// Ordered events produced by one backend call
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Uniform contract for provider-specific chat clients
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Provider name (e.g., "OpenAI", "Ollama")
    fn name(&self) -> &str;

    /// True when required credentials and endpoint are configured
    fn is_ready(&self) -> bool;

    /// Start one generation and return its event stream
    async fn complete_stream(&self, request: ChatRequest) -> Result<EventStream>;

    /// Estimate tokens for a text
    fn count_tokens(&self, text: &str) -> u32 {
        // Simple approximation: ~4 characters per token for English
        (text.len() as f64 / 4.0).ceil() as u32
    }
}

/// Request for one generation turn
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Model to use
    pub model: String,

    /// Conversation history followed by the new prompt
    pub messages: Vec<Message>,

    /// System prompt
    pub system: Option<String>,

    /// Maximum tokens in response
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// Whether the backend should stream deltas
    pub stream: bool,

    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    /// Create a new chat request
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            max_tokens: 4096,
            temperature: 1.0,
            stream: true,
            tools: vec![],
        }
    }

    /// Set the system prompt
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        let system = system.into();
        self.system = if system.trim().is_empty() {
            None
        } else {
            Some(system)
        };
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Enable or disable streaming
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set tools
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A content block announced by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockResponse {
    /// Answer text
    Text { text: String },

    /// Reasoning text
    Thinking { thinking: String },

    /// Tool use request
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of message
    EndTurn,
    /// Hit max tokens
    MaxTokens,
    /// Wants to use a tool
    ToolUse,
    /// Stop sequence hit
    StopSequence,
}

impl StopReason {
    /// Map an OpenAI-style `finish_reason`.
    pub fn from_finish_reason(reason: &str) -> Self {
        match reason {
            "length" => StopReason::MaxTokens,
            "tool_calls" | "function_call" => StopReason::ToolUse,
            _ => StopReason::EndTurn,
        }
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    /// Get total tokens used
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Events from a streaming response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Start of message
    MessageStart { id: String, model: String },

    /// Start of a content block
    ContentBlockStart {
        index: usize,
        content_block: ContentBlockResponse,
    },

    /// Delta to a content block
    ContentBlockDelta {
        index: usize,
        delta: ContentBlockDelta,
    },

    /// End of a content block
    ContentBlockStop { index: usize },

    /// Message delta (stop reason, usage)
    MessageDelta {
        stop_reason: Option<StopReason>,
        usage: Option<Usage>,
    },

    /// End of message
    MessageStop,

    /// Ping (keep-alive)
    Ping,

    /// Error reported inside the stream
    Error { error_type: String, message: String },
}

/// Delta update to a content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlockDelta {
    /// Answer text delta
    TextDelta { text: String },

    /// Reasoning text delta
    ThinkingDelta { thinking: String },

    /// Partial JSON for tool input
    InputJsonDelta { partial_json: String },
}

/// Tool definition for the LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: ToolInputSchema,
}

/// Input schema for a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInputSchema {
    /// Schema type (always "object")
    #[serde(rename = "type")]
    pub schema_type: String,

    /// Property definitions
    pub properties: serde_json::Value,

    /// Required properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}
