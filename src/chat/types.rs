// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Conversation records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ProviderKind;
use crate::chat::streaming::ToolInvocation;
use crate::chat::template::PromptTemplate;
use crate::knowledge::CitedChunk;

/// A conversation and its per-chat overrides
///
/// Every `Option` field is an override; `None` defers to the attached
/// template, then to the provider and settings defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,

    #[serde(default)]
    pub summary: String,

    /// Provider override for this chat
    #[serde(default)]
    pub provider: Option<ProviderKind>,

    /// Model name last used in this chat
    #[serde(default)]
    pub model: Option<String>,

    /// Attached prompt template
    #[serde(default)]
    pub prompt: Option<PromptTemplate>,

    #[serde(default)]
    pub system_message: Option<String>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub max_ctx_messages: Option<i32>,

    #[serde(default)]
    pub stream: Option<bool>,

    #[serde(default)]
    pub tool_enabled: Option<bool>,

    /// Knowledge collections searched for every prompt
    #[serde(default)]
    pub knowledge_collection_ids: Vec<String>,
}

impl Chat {
    /// Create an empty chat with no overrides
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Create a chat with a fresh random id
    pub fn create() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_prompt(mut self, prompt: PromptTemplate) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_max_ctx_messages(mut self, max_ctx_messages: i32) -> Self {
        self.max_ctx_messages = Some(max_ctx_messages);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_tool_enabled(mut self, enabled: bool) -> Self {
        self.tool_enabled = Some(enabled);
        self
    }

    pub fn with_collections(mut self, ids: Vec<String>) -> Self {
        self.knowledge_collection_ids = ids;
        self
    }

    /// Whether prompts in this chat are augmented with knowledge
    pub fn has_knowledge(&self) -> bool {
        !self.knowledge_collection_ids.is_empty()
    }
}

/// One prompt/reply pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub prompt: String,
    #[serde(default)]
    pub reply: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: u32,
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    /// Set while a turn is streaming into this message
    #[serde(default)]
    pub is_active: bool,
    /// JSON array of cited file names
    #[serde(default = "empty_json_array")]
    pub cited_files: String,
    /// JSON array of `{seqNo, content, id}`
    #[serde(default = "empty_json_array")]
    pub cited_chunks: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolInvocation>,
    pub created_at: DateTime<Utc>,
}

fn empty_json_array() -> String {
    "[]".to_string()
}

impl ChatMessage {
    /// Create a message with an empty reply
    pub fn new(chat_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            prompt: prompt.into(),
            reply: String::new(),
            reasoning: String::new(),
            model: String::new(),
            temperature: 0.0,
            max_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            is_active: false,
            cited_files: empty_json_array(),
            cited_chunks: empty_json_array(),
            tool_calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Create a completed exchange (history fixtures, imports)
    pub fn exchange(
        chat_id: impl Into<String>,
        prompt: impl Into<String>,
        reply: impl Into<String>,
    ) -> Self {
        let mut message = Self::new(chat_id, prompt);
        message.reply = reply.into();
        message
    }

    /// Cited file names, empty when the stored JSON is malformed
    pub fn cited_file_names(&self) -> Vec<String> {
        serde_json::from_str(&self.cited_files).unwrap_or_default()
    }

    /// Cited chunk snapshot, empty when the stored JSON is malformed
    pub fn cited_chunk_records(&self) -> Vec<CitedChunk> {
        serde_json::from_str(&self.cited_chunks).unwrap_or_default()
    }
}
