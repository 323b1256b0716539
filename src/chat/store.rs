// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message persistence seam
//!
//! The engine writes through `MessageStore`; the in-memory implementation
//! backs the CLI and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::chat::streaming::ToolInvocation;
use crate::chat::types::ChatMessage;
use crate::error::{PalaverError, Result};

/// Fields for a new message
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub chat_id: String,
    pub prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub is_active: bool,
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageUpdate {
    pub reply: Option<String>,
    pub reasoning: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub is_active: Option<bool>,
    pub cited_files: Option<String>,
    pub cited_chunks: Option<String>,
    pub tool_calls: Option<Vec<ToolInvocation>>,
}

impl MessageUpdate {
    /// Only clear the active flag
    pub fn deactivate() -> Self {
        Self {
            is_active: Some(false),
            ..Default::default()
        }
    }

    /// Reset a message for regeneration and mark it active
    pub fn restart(model: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            reply: Some(String::new()),
            reasoning: Some(String::new()),
            model: Some(model.into()),
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
            is_active: Some(true),
            cited_files: Some("[]".to_string()),
            cited_chunks: Some("[]".to_string()),
            tool_calls: Some(Vec::new()),
            ..Default::default()
        }
    }

    fn apply(self, message: &mut ChatMessage) {
        if let Some(reply) = self.reply {
            message.reply = reply;
        }
        if let Some(reasoning) = self.reasoning {
            message.reasoning = reasoning;
        }
        if let Some(model) = self.model {
            message.model = model;
        }
        if let Some(temperature) = self.temperature {
            message.temperature = temperature;
        }
        if let Some(max_tokens) = self.max_tokens {
            message.max_tokens = max_tokens;
        }
        if let Some(input_tokens) = self.input_tokens {
            message.input_tokens = input_tokens;
        }
        if let Some(output_tokens) = self.output_tokens {
            message.output_tokens = output_tokens;
        }
        if let Some(is_active) = self.is_active {
            message.is_active = is_active;
        }
        if let Some(cited_files) = self.cited_files {
            message.cited_files = cited_files;
        }
        if let Some(cited_chunks) = self.cited_chunks {
            message.cited_chunks = cited_chunks;
        }
        if let Some(tool_calls) = self.tool_calls {
            message.tool_calls = tool_calls;
        }
    }
}

/// One entry of the token usage ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Storage for messages and usage
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, message: NewMessage) -> Result<ChatMessage>;

    async fn update_message(&self, id: &str, update: MessageUpdate) -> Result<ChatMessage>;

    async fn get_message(&self, id: &str) -> Result<Option<ChatMessage>>;

    /// Messages of a chat in creation order
    async fn messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>>;

    async fn record_usage(&self, record: UsageRecord) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryState {
    messages: HashMap<String, ChatMessage>,
    order: Vec<String>,
    usage: Vec<UsageRecord>,
}

/// In-memory `MessageStore`
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    state: RwLock<MemoryState>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an existing message (history fixtures, imports)
    pub async fn insert(&self, message: ChatMessage) {
        let mut state = self.state.write().await;
        if !state.messages.contains_key(&message.id) {
            state.order.push(message.id.clone());
        }
        state.messages.insert(message.id.clone(), message);
    }

    /// Every usage record so far
    pub async fn usage(&self) -> Vec<UsageRecord> {
        self.state.read().await.usage.clone()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create_message(&self, message: NewMessage) -> Result<ChatMessage> {
        let mut record = ChatMessage::new(message.chat_id, message.prompt);
        record.model = message.model;
        record.temperature = message.temperature;
        record.max_tokens = message.max_tokens;
        record.is_active = message.is_active;
        self.insert(record.clone()).await;
        Ok(record)
    }

    async fn update_message(&self, id: &str, update: MessageUpdate) -> Result<ChatMessage> {
        let mut state = self.state.write().await;
        let message = state
            .messages
            .get_mut(id)
            .ok_or_else(|| PalaverError::Store(format!("Message not found: {}", id)))?;
        update.apply(message);
        Ok(message.clone())
    }

    async fn get_message(&self, id: &str) -> Result<Option<ChatMessage>> {
        Ok(self.state.read().await.messages.get(id).cloned())
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let state = self.state.read().await;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect())
    }

    async fn record_usage(&self, record: UsageRecord) -> Result<()> {
        self.state.write().await.usage.push(record);
        Ok(())
    }
}
