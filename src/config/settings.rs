// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for Palaver
//!
//! Handles loading and saving settings from ~/.palaver/settings.json

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::catalog::ProviderKind;

mod io;
mod migration;
mod validation;

pub use validation::default_api_key_env;

/// Main settings structure, stored in ~/.palaver/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Per-provider credentials and endpoints, keyed by lowercase provider id
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Defaults applied when a chat does not override them
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// User tool toggles: provider id -> model name -> enabled
    #[serde(default)]
    pub tool_states: BTreeMap<String, BTreeMap<String, bool>>,

    /// Knowledge store settings
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
}

/// Credentials and endpoint overrides for one provider
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderConfig {
    /// API key (if stored directly, not recommended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable name for the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Base URL override (custom endpoints, proxies, Azure resource URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Preferred model for new chats
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// Azure `api-version` query parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

/// Defaults for new turns
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefaultsConfig {
    /// Active provider when a chat names none
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Whether to use streaming by default
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Prior messages included as history (0 = stateless)
    #[serde(default = "default_max_ctx_messages")]
    pub max_ctx_messages: i32,

    /// Output tokens when neither model nor overrides specify them
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            stream: true,
            max_ctx_messages: default_max_ctx_messages(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// Knowledge store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeConfig {
    /// Root of the flat-file chunk store (defaults to ~/.palaver/knowledge)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<PathBuf>,

    /// Maximum chunks retrieved per turn
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            storage_path: None,
            search_limit: default_search_limit(),
        }
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::OpenAI
}

fn default_true() -> bool {
    true
}

fn default_max_ctx_messages() -> i32 {
    10
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_search_limit() -> usize {
    6
}

impl Settings {
    /// Config for `kind`, or an empty one when nothing is stored.
    pub fn provider(&self, kind: ProviderKind) -> ProviderConfig {
        self.providers.get(&kind.key()).cloned().unwrap_or_default()
    }

    /// Mutable config for `kind`, created on first access.
    pub fn provider_mut(&mut self, kind: ProviderKind) -> &mut ProviderConfig {
        self.providers.entry(kind.key()).or_default()
    }

    /// Record a tool toggle for a provider/model pair.
    pub fn set_tool_state(&mut self, kind: ProviderKind, model: &str, enabled: bool) {
        self.tool_states
            .entry(kind.key())
            .or_default()
            .insert(model.to_string(), enabled);
    }

    /// Tool toggle the user set explicitly, if any.
    pub fn tool_state(&self, kind: ProviderKind, model: &str) -> Option<bool> {
        self.tool_states
            .get(&kind.key())
            .and_then(|models| models.get(model))
            .copied()
    }
}
