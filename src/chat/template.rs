// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Prompt templates
//!
//! A template bundles a system message, a user message with `{{variable}}`
//! slots, and optional parameter overrides. Overrides only take effect when
//! they are set. The filled user message is appended to the typed input.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PalaverError, Result};

/// A reusable instruction bundle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptTemplate {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default)]
    pub user_message: Option<String>,
    #[serde(default)]
    pub system_variables: Vec<String>,
    #[serde(default)]
    pub user_variables: Vec<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Model labels this template targets; empty means any model
    #[serde(default)]
    pub models: Vec<String>,
}

fn variable_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_\-\.]+)\s*\}\}").unwrap())
}

/// Replace `{{name}}` slots with their values; unknown slots stay intact
pub fn fill_variables(text: &str, values: &HashMap<String, String>) -> String {
    variable_pattern()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            values
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Variable names referenced by `text`, in order of first appearance
pub fn extract_variables(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in variable_pattern().captures_iter(text) {
        let name = caps[1].to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

impl PromptTemplate {
    /// Create an empty template
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            ..Default::default()
        }
    }

    /// Read a template from a JSON file. Variable lists are derived from
    /// the messages.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut template: Self = serde_json::from_str(&text).map_err(|e| {
            PalaverError::Config(format!("Invalid template {}: {}", path.display(), e))
        })?;
        if template.id.is_empty() {
            template.id = uuid::Uuid::new_v4().to_string();
        }
        template.system_variables = template
            .system_message
            .as_deref()
            .map(extract_variables)
            .unwrap_or_default();
        template.user_variables = template
            .user_message
            .as_deref()
            .map(extract_variables)
            .unwrap_or_default();
        Ok(template)
    }

    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.system_variables = extract_variables(&message);
        self.system_message = Some(message);
        self
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.user_variables = extract_variables(&message);
        self.user_message = Some(message);
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

    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// A copy with both messages filled in
    pub fn apply(
        &self,
        system_values: &HashMap<String, String>,
        user_values: &HashMap<String, String>,
    ) -> Self {
        Self {
            system_message: self
                .system_message
                .as_deref()
                .map(|m| fill_variables(m, system_values)),
            user_message: self
                .user_message
                .as_deref()
                .map(|m| fill_variables(m, user_values)),
            ..self.clone()
        }
    }

    /// The prompt for `input`: the typed text followed by the user message
    pub fn compose_input(&self, input: &str) -> String {
        let message = self
            .user_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty());
        match message {
            None => input.to_string(),
            Some(message) if input.trim().is_empty() => message.to_string(),
            Some(message) => format!("{}\n{}", input, message),
        }
    }

    /// Whether the template may be used with the given model label
    pub fn is_applicable_to(&self, model_label: &str) -> bool {
        self.models.is_empty() || self.models.iter().any(|m| m == model_label)
    }
}
