// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Provider and model descriptors
//!
//! Static data describing each backend vendor: parameter ranges, wire format,
//! and the models it offers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed set of known providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    OpenAI,
    Anthropic,
    Azure,
    Google,
    Mistral,
    Moonshot,
    DeepSeek,
    Grok,
    OpenRouter,
    Ollama,
    LMStudio,
}

impl ProviderKind {
    /// Every known provider, in display order.
    pub const ALL: [ProviderKind; 11] = [
        ProviderKind::OpenAI,
        ProviderKind::Anthropic,
        ProviderKind::Azure,
        ProviderKind::Google,
        ProviderKind::Mistral,
        ProviderKind::Moonshot,
        ProviderKind::DeepSeek,
        ProviderKind::Grok,
        ProviderKind::OpenRouter,
        ProviderKind::Ollama,
        ProviderKind::LMStudio,
    ];

    /// Canonical identifier (also the serialized form).
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAI => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::Azure => "Azure",
            ProviderKind::Google => "Google",
            ProviderKind::Mistral => "Mistral",
            ProviderKind::Moonshot => "Moonshot",
            ProviderKind::DeepSeek => "DeepSeek",
            ProviderKind::Grok => "Grok",
            ProviderKind::OpenRouter => "OpenRouter",
            ProviderKind::Ollama => "Ollama",
            ProviderKind::LMStudio => "LMStudio",
        }
    }

    /// Settings key for this provider (lowercase).
    pub fn key(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ProviderKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.key() == wanted)
            .ok_or_else(|| format!("Unknown provider: {}", s))
    }
}

/// Request/stream dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// `/chat/completions` with SSE `data:` frames
    OpenAiCompatible,
    /// `/messages` with typed SSE events
    Anthropic,
    /// `/api/chat` with newline-delimited JSON
    Ollama,
}

/// Inclusive numeric range with an optional preferred default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumberRange {
    pub min: f32,
    pub max: f32,
    #[serde(default)]
    pub default: Option<f32>,
}

impl NumberRange {
    pub const fn new(min: f32, max: f32, default: Option<f32>) -> Self {
        Self { min, max, default }
    }

    /// Whether `value` is finite and inside `[min, max]`.
    pub fn contains(&self, value: f32) -> bool {
        value.is_finite() && value >= self.min && value <= self.max
    }

    /// The declared default if it lies in range, otherwise 1.0 clamped into range.
    pub fn default_value(&self) -> f32 {
        match self.default {
            Some(value) if self.contains(value) => value,
            _ => 1.0_f32.clamp(self.min, self.max),
        }
    }
}

/// A specific model of a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Identifier sent on the wire
    pub name: String,

    /// Human-readable label
    #[serde(default)]
    pub label: String,

    /// Context window in tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,

    /// Upper bound for output tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Output tokens requested when nothing overrides it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<u32>,

    #[serde(default)]
    pub tool_enabled: bool,

    #[serde(default)]
    pub vision_enabled: bool,

    /// Price per 1K input tokens in the provider's currency
    #[serde(default)]
    pub input_price: f64,

    /// Price per 1K output tokens in the provider's currency
    #[serde(default)]
    pub output_price: f64,

    #[serde(default)]
    pub is_default: bool,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            context_window: None,
            max_tokens: None,
            default_max_tokens: None,
            tool_enabled: false,
            vision_enabled: false,
            input_price: 0.0,
            output_price: 0.0,
            is_default: false,
        }
    }

    /// Descriptor for a model the catalog does not list (local servers).
    pub fn synthetic(name: impl Into<String>) -> Self {
        Self::new(name)
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_context(mut self, tokens: u32) -> Self {
        self.context_window = Some(tokens);
        self
    }

    /// Set the output bound and the default request size.
    pub fn with_output(mut self, max_tokens: u32, default_max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self.default_max_tokens = Some(default_max_tokens);
        self
    }

    pub fn with_price(mut self, input: f64, output: f64) -> Self {
        self.input_price = input;
        self.output_price = output;
        self
    }

    pub fn with_tools(mut self) -> Self {
        self.tool_enabled = true;
        self
    }

    pub fn with_vision(mut self) -> Self {
        self.vision_enabled = true;
        self
    }

    pub fn default_model(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Label if set, otherwise the wire name.
    pub fn display_name(&self) -> &str {
        if self.label.is_empty() {
            &self.name
        } else {
            &self.label
        }
    }
}

/// A backend vendor. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub base_url: String,
    pub wire: WireFormat,
    pub temperature: NumberRange,
    pub top_p: NumberRange,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<NumberRange>,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
    /// When false, the configured default model is always used
    #[serde(default = "default_true")]
    pub model_substitution: bool,
    #[serde(default = "default_true")]
    pub requires_api_key: bool,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_true() -> bool {
    true
}

fn default_currency() -> String {
    "USD".to_string()
}

impl ProviderDescriptor {
    pub fn new(kind: ProviderKind, base_url: impl Into<String>, wire: WireFormat) -> Self {
        Self {
            kind,
            base_url: base_url.into(),
            wire,
            temperature: NumberRange::new(0.0, 2.0, Some(1.0)),
            top_p: NumberRange::new(0.0, 1.0, None),
            presence_penalty: None,
            models: Vec::new(),
            model_substitution: true,
            requires_api_key: true,
            currency: default_currency(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    pub fn with_temperature(mut self, range: NumberRange) -> Self {
        self.temperature = range;
        self
    }

    pub fn with_top_p(mut self, range: NumberRange) -> Self {
        self.top_p = range;
        self
    }

    pub fn with_presence_penalty(mut self, range: NumberRange) -> Self {
        self.presence_penalty = Some(range);
        self
    }

    pub fn with_models(mut self, models: Vec<ModelDescriptor>) -> Self {
        self.models = models;
        self
    }

    pub fn without_model_substitution(mut self) -> Self {
        self.model_substitution = false;
        self
    }

    pub fn without_api_key(mut self) -> Self {
        self.requires_api_key = false;
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Look up a model by wire name.
    pub fn model(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|m| m.name == name)
    }

    /// The model marked default, else the first one.
    pub fn default_model(&self) -> Option<&ModelDescriptor> {
        self.models
            .iter()
            .find(|m| m.is_default)
            .or_else(|| self.models.first())
    }

    pub fn has_models(&self) -> bool {
        !self.models.is_empty()
    }
}
