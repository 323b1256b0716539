// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Chat context resolution
//!
//! Computes the effective generation parameters for one turn from three
//! layers, lowest priority first: the provider/model defaults, the chat's
//! prompt template, then the chat itself. A candidate that fails validation
//! is skipped and the next lower layer wins, so resolution never fails.
//!
//! The result is an owned snapshot. A turn keeps the snapshot it started
//! with even if settings change while it streams.

use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDate};

use crate::catalog::{ModelDescriptor, ProviderCatalog, ProviderDescriptor, ProviderKind};
use crate::chat::types::Chat;
use crate::chat::validation::{is_valid_max_tokens, is_valid_temperature};
use crate::config::Settings;

/// Placeholder replaced with the current date in system messages
pub const DATE_MACRO: &str = "#{date}";

/// Resolved parameters for one turn
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveContext {
    provider: Arc<ProviderDescriptor>,
    model: ModelDescriptor,
    system_message: Option<String>,
    temperature: f32,
    max_tokens: u32,
    max_ctx_messages: i32,
    stream: bool,
    tool_enabled: bool,
}

impl EffectiveContext {
    pub fn provider(&self) -> &ProviderDescriptor {
        &self.provider
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider.kind
    }

    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    pub fn system_message(&self) -> Option<&str> {
        self.system_message.as_deref()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    /// Prior messages to include as history; zero or less means none
    pub fn max_ctx_messages(&self) -> i32 {
        self.max_ctx_messages
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    pub fn tool_enabled(&self) -> bool {
        self.tool_enabled
    }
}

/// Resolves `EffectiveContext` from the catalog and settings
pub struct ChatContextResolver<'a> {
    catalog: &'a ProviderCatalog,
    settings: &'a Settings,
}

impl<'a> ChatContextResolver<'a> {
    pub fn new(catalog: &'a ProviderCatalog, settings: &'a Settings) -> Self {
        Self { catalog, settings }
    }

    /// Resolve using today's local date for the date macro
    pub fn resolve(&self, chat: &Chat) -> EffectiveContext {
        self.resolve_on(chat, Local::now().date_naive())
    }

    /// Resolve with an explicit date for the date macro
    pub fn resolve_on(&self, chat: &Chat, today: NaiveDate) -> EffectiveContext {
        let kind = chat.provider.unwrap_or(self.settings.defaults.provider);
        let provider = self.catalog.get(kind);
        let model = self.select_model(&provider, chat);

        let context = EffectiveContext {
            system_message: self.system_message(chat, today),
            temperature: self.temperature(&provider, chat),
            max_tokens: self.max_tokens(&model, chat),
            max_ctx_messages: chat
                .max_ctx_messages
                .unwrap_or(self.settings.defaults.max_ctx_messages),
            stream: chat.stream.unwrap_or(self.settings.defaults.stream),
            tool_enabled: self.tool_enabled(kind, &model, chat),
            provider,
            model,
        };

        tracing::debug!(
            target: "palaver.chat.context",
            chat_id = %chat.id,
            provider = %kind,
            model = %context.model.name,
            temperature = context.temperature,
            max_tokens = context.max_tokens,
            max_ctx_messages = context.max_ctx_messages,
            "Resolved chat context"
        );

        context
    }

    /// The model the turn will run on.
    ///
    /// A chat keeps its model across provider switches only when the new
    /// provider lists it; otherwise the provider's preferred model is used.
    fn select_model(&self, provider: &ProviderDescriptor, chat: &Chat) -> ModelDescriptor {
        let configured = self.settings.provider(provider.kind).default_model;

        if !provider.has_models() {
            let name = chat.model.clone().or(configured).unwrap_or_default();
            return ModelDescriptor::synthetic(name);
        }

        let preferred = configured
            .as_deref()
            .and_then(|name| provider.model(name))
            .or_else(|| provider.default_model());

        let chosen = if provider.model_substitution {
            chat.model
                .as_deref()
                .and_then(|name| provider.model(name))
                .or(preferred)
        } else {
            preferred
        };

        match chosen {
            Some(model) => model.clone(),
            None => ModelDescriptor::synthetic(configured.unwrap_or_default()),
        }
    }

    fn system_message(&self, chat: &Chat, today: NaiveDate) -> Option<String> {
        let template_message = chat
            .prompt
            .as_ref()
            .and_then(|p| p.system_message.as_deref());
        [template_message, chat.system_message.as_deref()]
            .into_iter()
            .flatten()
            .find(|m| !m.trim().is_empty())
            .map(|m| expand_date_macro(m, today))
    }

    fn temperature(&self, provider: &ProviderDescriptor, chat: &Chat) -> f32 {
        let template = chat.prompt.as_ref().and_then(|p| p.temperature);
        [chat.temperature, template]
            .into_iter()
            .find(|candidate| is_valid_temperature(*candidate, provider))
            .flatten()
            .unwrap_or_else(|| provider.temperature.default_value())
    }

    fn max_tokens(&self, model: &ModelDescriptor, chat: &Chat) -> u32 {
        let template = chat.prompt.as_ref().and_then(|p| p.max_tokens);
        [chat.max_tokens, template]
            .into_iter()
            .find(|candidate| is_valid_max_tokens(*candidate, model))
            .flatten()
            .or(model.default_max_tokens)
            .or(model.max_tokens)
            .unwrap_or(self.settings.defaults.max_tokens)
    }

    fn tool_enabled(&self, kind: ProviderKind, model: &ModelDescriptor, chat: &Chat) -> bool {
        chat.tool_enabled
            .or_else(|| self.settings.tool_state(kind, &model.name))
            .unwrap_or(model.tool_enabled)
    }
}

/// Replace every date placeholder with `YYYY-M-D` (no zero padding)
pub fn expand_date_macro(message: &str, today: NaiveDate) -> String {
    message.replace(
        DATE_MACRO,
        &format!("{}-{}-{}", today.year(), today.month(), today.day()),
    )
}
