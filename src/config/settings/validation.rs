// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use crate::catalog::{ProviderDescriptor, ProviderKind};

use super::Settings;

/// Environment variable consulted for a provider's API key.
pub fn default_api_key_env(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAI => "OPENAI_API_KEY",
        ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        ProviderKind::Azure => "AZURE_OPENAI_API_KEY",
        ProviderKind::Google => "GEMINI_API_KEY",
        ProviderKind::Mistral => "MISTRAL_API_KEY",
        ProviderKind::Moonshot => "MOONSHOT_API_KEY",
        ProviderKind::DeepSeek => "DEEPSEEK_API_KEY",
        ProviderKind::Grok => "XAI_API_KEY",
        ProviderKind::OpenRouter => "OPENROUTER_API_KEY",
        ProviderKind::Ollama => "OLLAMA_API_KEY",
        ProviderKind::LMStudio => "LMSTUDIO_API_KEY",
    }
}

impl Settings {
    /// Get the API key for a provider, checking the env var first.
    pub fn api_key(&self, kind: ProviderKind) -> Option<String> {
        let config = self.provider(kind);
        let env_name = config
            .api_key_env
            .clone()
            .unwrap_or_else(|| default_api_key_env(kind).to_string());
        // Priority: env var > config file.
        std::env::var(&env_name)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or(config.api_key)
            .filter(|key| !key.trim().is_empty())
    }

    /// Endpoint for a provider: configured override, else the catalog's.
    pub fn base_url(&self, provider: &ProviderDescriptor) -> String {
        self.provider(provider.kind)
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| provider.base_url.clone())
    }

    /// Check if the given provider has a usable configuration.
    pub fn is_provider_configured(&self, provider: &ProviderDescriptor) -> bool {
        let has_endpoint = !self.base_url(provider).is_empty();
        let has_key = !provider.requires_api_key || self.api_key(provider.kind).is_some();
        has_endpoint && has_key
    }
}
