// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat service factory
//!
//! Maps a provider identifier to a `ChatService` backed by the right wire
//! client. The mapping is exhaustive over `ProviderKind`; an identifier
//! outside that set is a configuration error raised immediately.

use std::sync::Arc;

use crate::catalog::{ProviderDescriptor, ProviderKind, WireFormat};
use crate::chat::context::EffectiveContext;
use crate::chat::service::ChatService;
use crate::config::Settings;
use crate::error::{PalaverError, Result};
use crate::llm::provider::ChatBackend;
use crate::llm::providers::{AnthropicBackend, OllamaBackend, OpenAiCompatibleBackend};

/// `api-version` sent to Azure deployments when settings name none
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Build the wire client for `provider`.
///
/// The descriptor's wire format picks the client; provider specifics only
/// tune the OpenAI-compatible one. Always returns a backend, even without
/// credentials; `is_ready()` on the result reports whether it can actually
/// be used.
pub fn create_backend(provider: &ProviderDescriptor, settings: &Settings) -> Arc<dyn ChatBackend> {
    let base_url = settings.base_url(provider);
    let api_key = settings.api_key(provider.kind);

    match provider.wire {
        WireFormat::Anthropic => Arc::new(AnthropicBackend::with_base_url(api_key, base_url)),
        WireFormat::Ollama => Arc::new(OllamaBackend::with_base_url(base_url)),
        WireFormat::OpenAiCompatible => {
            openai_compatible_backend(provider, settings, base_url, api_key)
        }
    }
}

fn openai_compatible_backend(
    provider: &ProviderDescriptor,
    settings: &Settings,
    base_url: String,
    api_key: Option<String>,
) -> Arc<dyn ChatBackend> {
    let mut backend = OpenAiCompatibleBackend::new(provider.name(), base_url, api_key);
    if !provider.requires_api_key {
        backend = backend.without_api_key();
    }

    match provider.kind {
        ProviderKind::Azure => {
            let api_version = settings
                .provider(ProviderKind::Azure)
                .api_version
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string());
            backend = backend.azure(api_version).with_stream_usage();
        }
        // No trailing usage chunk is requested from these.
        ProviderKind::Google | ProviderKind::Mistral | ProviderKind::Moonshot => {}
        ProviderKind::OpenAI
        | ProviderKind::DeepSeek
        | ProviderKind::Grok
        | ProviderKind::OpenRouter
        | ProviderKind::LMStudio
        | ProviderKind::Ollama
        | ProviderKind::Anthropic => backend = backend.with_stream_usage(),
    }
    Arc::new(backend)
}

/// Creates chat services by provider identifier
pub struct ChatServiceFactory;

impl ChatServiceFactory {
    /// Create a service for `provider_id` over an already resolved context.
    ///
    /// `provider_id` is matched case-insensitively against the known
    /// providers and must agree with the provider the context was resolved
    /// for.
    pub fn create(
        provider_id: &str,
        context: EffectiveContext,
        settings: &Settings,
    ) -> Result<ChatService> {
        let kind: ProviderKind = provider_id.parse().map_err(|_| {
            tracing::error!(target: "palaver.llm.factory", provider = %provider_id, "Unknown provider");
            PalaverError::Config(format!("Invalid provider: {}", provider_id))
        })?;

        if kind != context.provider_kind() {
            return Err(PalaverError::Config(format!(
                "Provider {} does not match the resolved context ({})",
                kind,
                context.provider_kind()
            )));
        }

        Ok(Self::build(context, settings))
    }

    fn build(context: EffectiveContext, settings: &Settings) -> ChatService {
        let backend = create_backend(context.provider(), settings);
        tracing::debug!(
            target: "palaver.llm.factory",
            provider = %context.provider_kind(),
            model = %context.model().name,
            ready = backend.is_ready(),
            "Created chat service"
        );
        ChatService::new(backend, context)
    }

    /// Every identifier `create` accepts, in display order
    pub fn supported_providers() -> Vec<String> {
        ProviderKind::ALL.iter().map(|kind| kind.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProviderCatalog;
    use crate::chat::context::ChatContextResolver;
    use crate::chat::types::Chat;

    fn settings_without_keys() -> Settings {
        let mut settings = Settings::default();
        for kind in ProviderKind::ALL {
            settings.provider_mut(kind).api_key_env =
                Some("PALAVER_FACTORY_TEST_NONEXISTENT_ENV".to_string());
        }
        settings
    }

    fn context_for(kind: ProviderKind, settings: &Settings) -> EffectiveContext {
        let catalog = ProviderCatalog::builtin();
        ChatContextResolver::new(&catalog, settings).resolve(&Chat::new("c").with_provider(kind))
    }

    #[test]
    fn test_create_backend_for_every_kind() {
        let catalog = ProviderCatalog::builtin();
        let settings = settings_without_keys();
        for provider in catalog.providers() {
            let backend = create_backend(&provider, &settings);
            assert_eq!(backend.name(), provider.name());
        }
    }

    #[test]
    fn test_local_backends_ready_without_keys() {
        let catalog = ProviderCatalog::builtin();
        let settings = settings_without_keys();
        assert!(create_backend(&catalog.get(ProviderKind::Ollama), &settings).is_ready());
        assert!(create_backend(&catalog.get(ProviderKind::LMStudio), &settings).is_ready());
        assert!(!create_backend(&catalog.get(ProviderKind::OpenAI), &settings).is_ready());
        assert!(!create_backend(&catalog.get(ProviderKind::Anthropic), &settings).is_ready());
    }

    #[test]
    fn test_azure_needs_endpoint() {
        let catalog = ProviderCatalog::builtin();
        let mut settings = settings_without_keys();
        settings.provider_mut(ProviderKind::Azure).api_key = Some("az-key".into());
        assert!(!create_backend(&catalog.get(ProviderKind::Azure), &settings).is_ready());

        settings.provider_mut(ProviderKind::Azure).base_url =
            Some("https://example.openai.azure.com/openai/deployments/gpt4o".into());
        assert!(create_backend(&catalog.get(ProviderKind::Azure), &settings).is_ready());
    }

    #[test]
    fn test_create_known_provider() {
        let mut settings = settings_without_keys();
        settings.provider_mut(ProviderKind::OpenAI).api_key = Some("sk-test".into());
        let context = context_for(ProviderKind::OpenAI, &settings);

        let service = ChatServiceFactory::create("openai", context, &settings).unwrap();
        assert_eq!(service.provider_name(), "OpenAI");
        assert!(service.is_ready());
    }

    #[test]
    fn test_create_is_case_insensitive() {
        let settings = settings_without_keys();
        let context = context_for(ProviderKind::LMStudio, &settings);
        assert!(ChatServiceFactory::create("LMStudio", context, &settings).is_ok());
    }

    #[test]
    fn test_create_unknown_provider_fails_fast() {
        let settings = settings_without_keys();
        let context = context_for(ProviderKind::OpenAI, &settings);
        let err = ChatServiceFactory::create("acme", context, &settings).unwrap_err();
        assert!(matches!(err, PalaverError::Config(_)));
        assert!(err.to_string().contains("Invalid provider: acme"));
    }

    #[test]
    fn test_create_rejects_mismatched_context() {
        let settings = settings_without_keys();
        let context = context_for(ProviderKind::OpenAI, &settings);
        let result = ChatServiceFactory::create("anthropic", context, &settings);
        assert!(matches!(result, Err(PalaverError::Config(_))));
    }

    #[test]
    fn test_supported_providers() {
        let ids = ChatServiceFactory::supported_providers();
        assert_eq!(ids.len(), ProviderKind::ALL.len());
        assert!(ids.contains(&"ollama".to_string()));
        assert!(ids.contains(&"lmstudio".to_string()));
    }
}
