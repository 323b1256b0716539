// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Wire clients for each dialect

pub mod anthropic;
pub(crate) mod common;
pub mod ollama;
pub mod openai_compat;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai_compat::OpenAiCompatibleBackend;
