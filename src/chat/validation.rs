// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Parameter checks used during context resolution
//!
//! A rejected candidate is skipped, never reported.

use crate::catalog::{ModelDescriptor, ProviderDescriptor};

/// Temperature is set, finite and inside the provider's declared range
pub fn is_valid_temperature(value: Option<f32>, provider: &ProviderDescriptor) -> bool {
    value.is_some_and(|t| provider.temperature.contains(t))
}

/// Max tokens is set, positive and within the model's output limit
pub fn is_valid_max_tokens(value: Option<u32>, model: &ModelDescriptor) -> bool {
    match value {
        Some(0) | None => false,
        Some(tokens) => model.max_tokens.map_or(true, |limit| tokens <= limit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{builtin, ProviderKind};

    #[test]
    fn test_temperature_range_per_provider() {
        let anthropic = builtin::descriptor(ProviderKind::Anthropic);
        let openai = builtin::descriptor(ProviderKind::OpenAI);

        assert!(is_valid_temperature(Some(0.7), &anthropic));
        assert!(is_valid_temperature(Some(1.0), &anthropic));
        assert!(!is_valid_temperature(Some(1.5), &anthropic));
        assert!(is_valid_temperature(Some(1.5), &openai));
        assert!(!is_valid_temperature(Some(-0.1), &openai));
    }

    #[test]
    fn test_temperature_rejects_missing_and_nan() {
        let openai = builtin::descriptor(ProviderKind::OpenAI);
        assert!(!is_valid_temperature(None, &openai));
        assert!(!is_valid_temperature(Some(f32::NAN), &openai));
    }

    #[test]
    fn test_max_tokens_bounds() {
        let model = ModelDescriptor::new("m").with_output(4096, 1024);
        assert!(is_valid_max_tokens(Some(1), &model));
        assert!(is_valid_max_tokens(Some(4096), &model));
        assert!(!is_valid_max_tokens(Some(4097), &model));
        assert!(!is_valid_max_tokens(Some(0), &model));
        assert!(!is_valid_max_tokens(None, &model));
    }

    #[test]
    fn test_max_tokens_without_declared_limit() {
        let model = ModelDescriptor::synthetic("local-model");
        assert!(is_valid_max_tokens(Some(100_000), &model));
    }
}
