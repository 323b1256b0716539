// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Scripted chat backend for tests
//!
//! Replays a fixed list of steps as a stream of `StreamEvent`s and records
//! every request it receives. Useful for exercising the streaming session,
//! abort handling and the turn engine without a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;

use crate::error::{ApiError, PalaverError, Result};
use crate::llm::provider::{
    ChatBackend, ChatRequest, ContentBlockDelta, ContentBlockResponse, EventStream, StopReason,
    StreamEvent, Usage,
};

/// One scripted step of a mock turn
#[derive(Debug, Clone, PartialEq)]
pub enum MockStep {
    /// Emit a text delta
    Text(String),
    /// Emit a reasoning delta
    Reasoning(String),
    /// Emit a complete tool call
    ToolCall {
        name: String,
        input: serde_json::Value,
    },
    /// Report token usage
    Usage { input: u32, output: u32 },
    /// Sleep before the next step
    Delay(Duration),
    /// Fail the stream with this error
    Fail(ApiError),
    /// Emit an in-band error event
    ErrorEvent(String),
    /// Never produce another event
    Hang,
    /// End the stream without a stop event
    Eof,
}

/// A scripted backend
#[derive(Clone)]
pub struct MockBackend {
    name: String,
    ready: bool,
    steps: Arc<Mutex<Vec<MockStep>>>,
    dispatch_error: Option<ApiError>,
    call_count: Arc<AtomicUsize>,
    recorded_requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("Mock backend lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

impl MockBackend {
    /// Create a mock that answers "Mock response"
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            ready: true,
            steps: Arc::new(Mutex::new(vec![MockStep::Text("Mock response".to_string())])),
            dispatch_error: None,
            call_count: Arc::new(AtomicUsize::new(0)),
            recorded_requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Create a mock with a custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the script
    pub fn with_steps(self, steps: Vec<MockStep>) -> Self {
        *lock(&self.steps) = steps;
        self
    }

    /// Answer with the given text chunks, one delta each
    pub fn with_chunks<I, S>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let steps = chunks
            .into_iter()
            .map(|chunk| MockStep::Text(chunk.into()))
            .collect();
        self.with_steps(steps)
    }

    /// Fail before any event is produced
    pub fn failing_with(mut self, error: ApiError) -> Self {
        self.dispatch_error = Some(error);
        self
    }

    /// Report missing credentials
    pub fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Number of `complete_stream` calls
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// All requests received so far
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        lock(&self.recorded_requests).clone()
    }

    /// The most recent request
    pub fn last_request(&self) -> Option<ChatRequest> {
        lock(&self.recorded_requests).last().cloned()
    }
}

#[async_trait]
impl ChatBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn complete_stream(&self, request: ChatRequest) -> Result<EventStream> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let model = request.model.clone();
        lock(&self.recorded_requests).push(request);

        if let Some(error) = &self.dispatch_error {
            return Err(PalaverError::Api(error.clone()));
        }

        let steps = lock(&self.steps).clone();
        let events = stream! {
            yield Ok(StreamEvent::MessageStart { id: "msg_mock".to_string(), model });

            let mut tool_index = 0usize;
            let mut stop_reason = StopReason::EndTurn;
            for step in steps {
                match step {
                    MockStep::Text(text) => {
                        yield Ok(StreamEvent::ContentBlockDelta {
                            index: 0,
                            delta: ContentBlockDelta::TextDelta { text },
                        });
                    }
                    MockStep::Reasoning(thinking) => {
                        yield Ok(StreamEvent::ContentBlockDelta {
                            index: 0,
                            delta: ContentBlockDelta::ThinkingDelta { thinking },
                        });
                    }
                    MockStep::ToolCall { name, input } => {
                        tool_index += 1;
                        stop_reason = StopReason::ToolUse;
                        yield Ok(StreamEvent::ContentBlockStart {
                            index: tool_index,
                            content_block: ContentBlockResponse::ToolUse {
                                id: format!("toolu_{}", uuid::Uuid::new_v4().simple()),
                                name,
                                input: serde_json::json!({}),
                            },
                        });
                        yield Ok(StreamEvent::ContentBlockDelta {
                            index: tool_index,
                            delta: ContentBlockDelta::InputJsonDelta {
                                partial_json: input.to_string(),
                            },
                        });
                        yield Ok(StreamEvent::ContentBlockStop { index: tool_index });
                    }
                    MockStep::Usage { input, output } => {
                        yield Ok(StreamEvent::MessageDelta {
                            stop_reason: None,
                            usage: Some(Usage { input_tokens: input, output_tokens: output }),
                        });
                    }
                    MockStep::Delay(duration) => {
                        tokio::time::sleep(duration).await;
                    }
                    MockStep::Fail(error) => {
                        yield Err(PalaverError::Api(error));
                        return;
                    }
                    MockStep::ErrorEvent(message) => {
                        yield Ok(StreamEvent::Error {
                            error_type: "mock_error".to_string(),
                            message,
                        });
                        return;
                    }
                    MockStep::Hang => {
                        futures::future::pending::<()>().await;
                    }
                    MockStep::Eof => return,
                }
            }

            yield Ok(StreamEvent::MessageDelta { stop_reason: Some(stop_reason), usage: None });
            yield Ok(StreamEvent::MessageStop);
        };

        Ok(Box::pin(events))
    }
}
