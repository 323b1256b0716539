// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streaming response handling
//!
//! Folds backend `StreamEvent`s into the reply, reasoning, tool calls and
//! usage of one turn. Kept free of I/O so it can be driven directly in tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::llm::provider::{ContentBlockDelta, ContentBlockResponse, StopReason, StreamEvent, Usage};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Final state of one turn
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnResult {
    pub content: String,
    pub reasoning: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub tool_calls: Vec<ToolInvocation>,
    pub stop_reason: Option<StopReason>,
}

impl TurnResult {
    /// Whether the model produced neither answer nor reasoning text
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty() && self.reasoning.trim().is_empty()
    }
}

#[derive(Debug, Default)]
struct PendingTool {
    id: String,
    name: String,
    input: serde_json::Value,
    partial_json: String,
}

/// Accumulator for streaming response content
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    reasoning: String,
    tools: BTreeMap<usize, PendingTool>,
    usage: Usage,
    stop_reason: Option<StopReason>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply text so far
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Reasoning text so far
    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Process a stream event and report what it contributed
    pub fn process_event(&mut self, event: StreamEvent) -> StreamEventResult {
        match event {
            StreamEvent::MessageStart { .. } => StreamEventResult::MessageStart,
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlockResponse::Text { text } => self.push_text(text),
                ContentBlockResponse::Thinking { thinking } => self.push_reasoning(thinking),
                ContentBlockResponse::ToolUse { id, name, input } => {
                    self.tools.insert(
                        index,
                        PendingTool {
                            id,
                            name: name.clone(),
                            input,
                            partial_json: String::new(),
                        },
                    );
                    StreamEventResult::ToolStarted(name)
                }
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                ContentBlockDelta::TextDelta { text } => self.push_text(text),
                ContentBlockDelta::ThinkingDelta { thinking } => self.push_reasoning(thinking),
                ContentBlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(tool) = self.tools.get_mut(&index) {
                        tool.partial_json.push_str(&partial_json);
                    }
                    StreamEventResult::ToolInputDelta
                }
            },
            StreamEvent::ContentBlockStop { index } => {
                if let Some(tool) = self.tools.get_mut(&index) {
                    finalize_tool_input(tool);
                }
                StreamEventResult::BlockStopped
            }
            StreamEvent::MessageDelta { stop_reason, usage } => {
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason;
                }
                if let Some(usage) = usage {
                    self.merge_usage(usage);
                }
                StreamEventResult::MessageDelta(stop_reason)
            }
            StreamEvent::MessageStop => StreamEventResult::MessageStop,
            StreamEvent::Ping => StreamEventResult::Ping,
            StreamEvent::Error {
                error_type,
                message,
            } => StreamEventResult::Error {
                error_type,
                message,
            },
        }
    }

    fn push_text(&mut self, text: String) -> StreamEventResult {
        if text.is_empty() {
            return StreamEventResult::Ignored;
        }
        self.content.push_str(&text);
        StreamEventResult::TextDelta(text)
    }

    fn push_reasoning(&mut self, thinking: String) -> StreamEventResult {
        if thinking.is_empty() {
            return StreamEventResult::Ignored;
        }
        self.reasoning.push_str(&thinking);
        StreamEventResult::ReasoningDelta(thinking)
    }

    /// Backends report input and output counts in separate events
    fn merge_usage(&mut self, usage: Usage) {
        if usage.input_tokens > 0 {
            self.usage.input_tokens = usage.input_tokens;
        }
        if usage.output_tokens > 0 {
            self.usage.output_tokens = usage.output_tokens;
        }
    }

    /// Consume the accumulator and return the turn's final state
    pub fn finish(mut self) -> TurnResult {
        let tool_calls = std::mem::take(&mut self.tools)
            .into_values()
            .map(|mut tool| {
                finalize_tool_input(&mut tool);
                ToolInvocation {
                    id: tool.id,
                    name: tool.name,
                    input: tool.input,
                }
            })
            .collect();

        TurnResult {
            content: self.content,
            reasoning: self.reasoning,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            tool_calls,
            stop_reason: self.stop_reason,
        }
    }
}

fn finalize_tool_input(tool: &mut PendingTool) {
    if tool.partial_json.is_empty() {
        return;
    }
    match serde_json::from_str(&tool.partial_json) {
        Ok(parsed) => tool.input = parsed,
        Err(e) => tracing::warn!(
            target: "palaver.chat.streaming",
            tool = %tool.name,
            error = %e,
            "Discarding unparseable tool input"
        ),
    }
    tool.partial_json.clear();
}

/// Result of processing a stream event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventResult {
    MessageStart,
    /// Answer text to display
    TextDelta(String),
    /// Reasoning text to display
    ReasoningDelta(String),
    /// The model started a tool call
    ToolStarted(String),
    ToolInputDelta,
    BlockStopped,
    MessageDelta(Option<StopReason>),
    MessageStop,
    Ping,
    /// Backend reported an error inside the stream
    Error { error_type: String, message: String },
    /// Nothing to report (empty delta)
    Ignored,
}

/// Move a leading `<think>` block out of the reply.
///
/// Returns `(reply, reasoning)`. Reasoning already delivered on the separate
/// channel takes precedence over the inline block.
pub fn split_reasoning(content: &str, reasoning: &str) -> (String, String) {
    let trimmed = content.trim_start();
    let Some(rest) = trimmed.strip_prefix(THINK_OPEN) else {
        return (content.to_string(), reasoning.to_string());
    };

    let (inline, reply) = match rest.find(THINK_CLOSE) {
        Some(end) => (&rest[..end], rest[end + THINK_CLOSE.len()..].trim_start()),
        None => (rest, ""),
    };

    let reasoning = if reasoning.trim().is_empty() {
        inline.trim().to_string()
    } else {
        reasoning.to_string()
    };
    (reply.to_string(), reasoning)
}
