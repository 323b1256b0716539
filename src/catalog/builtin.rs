// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Built-in provider descriptors

use super::schema::{ModelDescriptor, NumberRange, ProviderDescriptor, ProviderKind, WireFormat};

/// Descriptor shipped with the binary for `kind`.
pub fn descriptor(kind: ProviderKind) -> ProviderDescriptor {
    match kind {
        ProviderKind::OpenAI => openai(),
        ProviderKind::Anthropic => anthropic(),
        ProviderKind::Azure => azure(),
        ProviderKind::Google => google(),
        ProviderKind::Mistral => mistral(),
        ProviderKind::Moonshot => moonshot(),
        ProviderKind::DeepSeek => deepseek(),
        ProviderKind::Grok => grok(),
        ProviderKind::OpenRouter => openrouter(),
        ProviderKind::Ollama => ollama(),
        ProviderKind::LMStudio => lmstudio(),
    }
}

fn openai() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::OpenAI,
        "https://api.openai.com/v1",
        WireFormat::OpenAiCompatible,
    )
    .with_temperature(NumberRange::new(0.0, 2.0, Some(1.0)))
    .with_presence_penalty(NumberRange::new(-2.0, 2.0, Some(0.0)))
    .with_models(vec![
        ModelDescriptor::new("gpt-4o")
            .with_context(128_000)
            .with_output(16_384, 4_096)
            .with_price(0.0025, 0.01)
            .with_tools()
            .with_vision()
            .default_model(),
        ModelDescriptor::new("gpt-4o-mini")
            .with_context(128_000)
            .with_output(16_384, 4_096)
            .with_price(0.00015, 0.0006)
            .with_tools()
            .with_vision(),
        ModelDescriptor::new("o3-mini")
            .with_context(200_000)
            .with_output(100_000, 8_000)
            .with_price(0.0011, 0.0044)
            .with_tools(),
        ModelDescriptor::new("gpt-4")
            .with_context(8_192)
            .with_output(8_192, 4_000)
            .with_price(0.03, 0.06)
            .with_tools(),
    ])
}

fn anthropic() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::Anthropic,
        "https://api.anthropic.com/v1",
        WireFormat::Anthropic,
    )
    .with_temperature(NumberRange::new(0.0, 1.0, Some(1.0)))
    .with_models(vec![
        ModelDescriptor::new("claude-3-7-sonnet-20250219")
            .with_label("claude-3.7-sonnet-latest")
            .with_context(200_000)
            .with_output(8_192, 8_000)
            .with_price(0.003, 0.015)
            .with_tools()
            .with_vision()
            .default_model(),
        ModelDescriptor::new("claude-3-5-sonnet-20241022")
            .with_label("claude-3.5-sonnet-latest")
            .with_context(200_000)
            .with_output(8_192, 8_000)
            .with_price(0.003, 0.015)
            .with_tools()
            .with_vision(),
        ModelDescriptor::new("claude-3-5-haiku-20241022")
            .with_label("claude-3.5-haiku")
            .with_context(200_000)
            .with_output(8_192, 8_000)
            .with_price(0.001, 0.005)
            .with_tools(),
        ModelDescriptor::new("claude-3-opus-20240229")
            .with_label("claude-3-opus")
            .with_context(200_000)
            .with_output(4_096, 4_000)
            .with_price(0.015, 0.075)
            .with_tools()
            .with_vision(),
    ])
}

// Azure exposes one deployment per endpoint, so the configured model is used as-is.
fn azure() -> ProviderDescriptor {
    ProviderDescriptor::new(ProviderKind::Azure, "", WireFormat::OpenAiCompatible)
        .with_temperature(NumberRange::new(0.0, 2.0, Some(1.0)))
        .with_models(vec![ModelDescriptor::new("gpt-4o")
            .with_context(128_000)
            .with_output(16_384, 4_096)
            .with_price(0.0025, 0.01)
            .with_tools()
            .with_vision()
            .default_model()])
        .without_model_substitution()
}

fn google() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::Google,
        "https://generativelanguage.googleapis.com/v1beta/openai",
        WireFormat::OpenAiCompatible,
    )
    .with_temperature(NumberRange::new(0.0, 2.0, Some(1.0)))
    .with_models(vec![
        ModelDescriptor::new("gemini-2.0-flash")
            .with_context(1_048_576)
            .with_output(8_192, 8_192)
            .with_price(0.0001, 0.0004)
            .with_tools()
            .with_vision()
            .default_model(),
        ModelDescriptor::new("gemini-1.5-pro")
            .with_context(2_097_152)
            .with_output(8_192, 8_192)
            .with_price(0.00125, 0.005)
            .with_tools()
            .with_vision(),
    ])
}

fn mistral() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::Mistral,
        "https://api.mistral.ai/v1",
        WireFormat::OpenAiCompatible,
    )
    .with_temperature(NumberRange::new(0.0, 1.0, Some(0.7)))
    .with_models(vec![
        ModelDescriptor::new("mistral-large-latest")
            .with_context(128_000)
            .with_output(8_192, 4_096)
            .with_price(0.002, 0.006)
            .with_tools()
            .default_model(),
        ModelDescriptor::new("codestral-latest")
            .with_context(256_000)
            .with_output(8_192, 4_096)
            .with_price(0.0003, 0.0009)
            .with_tools(),
    ])
}

fn moonshot() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::Moonshot,
        "https://api.moonshot.cn/v1",
        WireFormat::OpenAiCompatible,
    )
    .with_temperature(NumberRange::new(0.0, 1.0, Some(0.3)))
    .with_currency("CNY")
    .with_models(vec![
        ModelDescriptor::new("moonshot-v1-8k")
            .with_context(8_192)
            .with_price(0.012, 0.012)
            .with_tools()
            .default_model(),
        ModelDescriptor::new("moonshot-v1-32k")
            .with_context(32_768)
            .with_price(0.024, 0.024)
            .with_tools(),
        ModelDescriptor::new("moonshot-v1-128k")
            .with_context(131_072)
            .with_price(0.06, 0.06)
            .with_tools(),
    ])
}

fn deepseek() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::DeepSeek,
        "https://api.deepseek.com",
        WireFormat::OpenAiCompatible,
    )
    .with_temperature(NumberRange::new(0.0, 2.0, Some(1.0)))
    .with_models(vec![
        ModelDescriptor::new("deepseek-chat")
            .with_context(65_536)
            .with_output(8_192, 4_096)
            .with_price(0.00027, 0.0011)
            .with_tools()
            .default_model(),
        ModelDescriptor::new("deepseek-reasoner")
            .with_context(65_536)
            .with_output(8_192, 4_096)
            .with_price(0.00055, 0.00219),
    ])
}

fn grok() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::Grok,
        "https://api.x.ai/v1",
        WireFormat::OpenAiCompatible,
    )
    .with_temperature(NumberRange::new(0.0, 2.0, Some(0.9)))
    .with_models(vec![
        ModelDescriptor::new("grok-2-latest")
            .with_context(131_072)
            .with_price(0.002, 0.01)
            .with_tools()
            .default_model(),
        ModelDescriptor::new("grok-2-vision-latest")
            .with_context(32_768)
            .with_price(0.002, 0.01)
            .with_vision(),
    ])
}

fn openrouter() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::OpenRouter,
        "https://openrouter.ai/api/v1",
        WireFormat::OpenAiCompatible,
    )
    .with_temperature(NumberRange::new(0.0, 2.0, Some(1.0)))
    .with_models(vec![
        ModelDescriptor::new("anthropic/claude-3.7-sonnet")
            .with_label("Claude 3.7 Sonnet (via OpenRouter)")
            .with_context(200_000)
            .with_output(8_192, 8_000)
            .with_price(0.003, 0.015)
            .with_tools()
            .with_vision()
            .default_model(),
        ModelDescriptor::new("openai/gpt-4o")
            .with_label("GPT-4o (via OpenRouter)")
            .with_context(128_000)
            .with_output(16_384, 4_096)
            .with_price(0.0025, 0.01)
            .with_tools()
            .with_vision(),
        ModelDescriptor::new("deepseek/deepseek-r1")
            .with_label("DeepSeek R1 (via OpenRouter)")
            .with_context(64_000)
            .with_output(8_192, 4_096)
            .with_price(0.00055, 0.00219),
    ])
}

fn ollama() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::Ollama,
        "http://127.0.0.1:11434",
        WireFormat::Ollama,
    )
    .with_temperature(NumberRange::new(0.0, 1.0, Some(0.8)))
    .without_api_key()
}

fn lmstudio() -> ProviderDescriptor {
    ProviderDescriptor::new(
        ProviderKind::LMStudio,
        "http://127.0.0.1:1234/v1",
        WireFormat::OpenAiCompatible,
    )
    .with_temperature(NumberRange::new(0.0, 2.0, Some(0.8)))
    .without_api_key()
}
