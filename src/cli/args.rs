// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::catalog::ProviderKind;
use crate::chat::template::PromptTemplate;
use crate::chat::types::Chat;
use crate::error::{PalaverError, Result};

/// Palaver - one chat interface over many LLM backends
#[derive(Parser, Debug)]
#[command(name = "palaver")]
#[command(version, about = "One chat interface over many LLM backends")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to $PALAVER_HOME/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a single question and stream the reply
    Ask(AskArgs),

    /// List known providers and their configuration state
    Providers(ProvidersArgs),

    /// Print the context a turn would run with, as JSON
    Resolve(ResolveArgs),

    /// Manage knowledge collections
    #[command(alias = "kb")]
    Knowledge(KnowledgeArgs),
}

/// Per-chat overrides shared by `ask` and `resolve`
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ChatOverrides {
    /// Provider to use (openai, anthropic, azure, google, mistral, moonshot,
    /// deepseek, grok, openrouter, ollama, lmstudio)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Model to use
    #[arg(short, long)]
    pub model: Option<String>,

    /// Sampling temperature
    #[arg(long)]
    pub temperature: Option<f32>,

    /// Maximum tokens in the reply
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// System message
    #[arg(short, long)]
    pub system: Option<String>,

    /// Number of prior messages to send as history
    #[arg(long)]
    pub max_ctx_messages: Option<i32>,

    /// Prompt template file (JSON)
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Template variable as KEY=VALUE
    #[arg(long = "var", value_parser = parse_variable)]
    pub vars: Vec<(String, String)>,
}

fn parse_variable(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

impl ChatOverrides {
    /// Apply the overrides to `chat`. An unknown provider is rejected.
    pub fn apply(&self, mut chat: Chat) -> Result<Chat> {
        if let Some(provider) = &self.provider {
            let kind: ProviderKind = provider
                .parse()
                .map_err(|_| PalaverError::Config(format!("Invalid provider: {}", provider)))?;
            chat = chat.with_provider(kind);
        }
        if let Some(model) = &self.model {
            chat = chat.with_model(model.clone());
        }
        if let Some(temperature) = self.temperature {
            chat = chat.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.max_tokens {
            chat = chat.with_max_tokens(max_tokens);
        }
        if let Some(system) = &self.system {
            chat = chat.with_system_message(system.clone());
        }
        if let Some(max_ctx_messages) = self.max_ctx_messages {
            chat = chat.with_max_ctx_messages(max_ctx_messages);
        }
        if let Some(path) = &self.template {
            let values: HashMap<String, String> = self.vars.iter().cloned().collect();
            chat = chat.with_prompt(PromptTemplate::load(path)?.apply(&values, &values));
        }
        Ok(chat)
    }
}

/// Arguments for the ask command
#[derive(clap::Args, Debug)]
pub struct AskArgs {
    /// The question to ask
    pub prompt: String,

    #[command(flatten)]
    pub overrides: ChatOverrides,

    /// Knowledge collections to ground the answer in
    #[arg(short, long = "collection", num_args = 1..)]
    pub collections: Vec<String>,

    /// Wait for the whole reply instead of streaming
    #[arg(long)]
    pub no_stream: bool,
}

impl AskArgs {
    /// The one-off chat this question runs in
    pub fn to_chat(&self) -> Result<Chat> {
        let mut chat = self.overrides.apply(Chat::create())?;
        if self.no_stream {
            chat = chat.with_stream(false);
        }
        if !self.collections.is_empty() {
            chat = chat.with_collections(self.collections.clone());
        }
        Ok(chat)
    }

    /// Text sent for this question in `chat`, including the template's
    /// user message
    pub fn input(&self, chat: &Chat) -> String {
        match &chat.prompt {
            Some(template) => template.compose_input(&self.prompt),
            None => self.prompt.clone(),
        }
    }
}

/// Arguments for the providers command
#[derive(clap::Args, Debug)]
pub struct ProvidersArgs {
    /// Also list models pulled into the local Ollama server
    #[arg(long)]
    pub local: bool,
}

/// Arguments for the resolve command
#[derive(clap::Args, Debug)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub overrides: ChatOverrides,
}

/// Arguments for knowledge management
#[derive(clap::Args, Debug)]
pub struct KnowledgeArgs {
    #[command(subcommand)]
    pub command: KnowledgeCommands,
}

/// Knowledge subcommands
#[derive(Subcommand, Debug)]
pub enum KnowledgeCommands {
    /// Import a text file into a collection, one chunk per paragraph
    Import {
        /// Collection id
        collection: String,
        /// File to import
        file: PathBuf,
    },

    /// Search a collection
    Search {
        /// Collection id
        collection: String,
        /// Text to look for
        query: String,
        /// Maximum number of chunks
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Remove a collection and all of its files
    Remove {
        /// Collection id
        collection: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["palaver"]).is_err());
    }

    #[test]
    fn test_cli_verbose_and_config() {
        let cli = Cli::parse_from(["palaver", "-vv", "--config", "/tmp/s.json", "providers"]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(cli.command, Commands::Providers(ProvidersArgs { local: false })));
    }

    #[test]
    fn test_ask_parses_overrides() {
        let cli = Cli::parse_from([
            "palaver",
            "ask",
            "What is Rust?",
            "-p",
            "anthropic",
            "-m",
            "claude-3-5-haiku-20241022",
            "--temperature",
            "0.3",
            "--max-tokens",
            "512",
            "--collection",
            "docs",
            "notes",
        ]);
        let Commands::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.prompt, "What is Rust?");
        assert_eq!(args.collections, vec!["docs", "notes"]);

        let chat = args.to_chat().unwrap();
        assert_eq!(chat.provider, Some(ProviderKind::Anthropic));
        assert_eq!(chat.model.as_deref(), Some("claude-3-5-haiku-20241022"));
        assert_eq!(chat.temperature, Some(0.3));
        assert_eq!(chat.max_tokens, Some(512));
        assert!(chat.has_knowledge());
    }

    #[test]
    fn test_ask_no_stream() {
        let cli = Cli::parse_from(["palaver", "ask", "hi", "--no-stream"]);
        let Commands::Ask(args) = cli.command else {
            panic!("expected ask");
        };
        assert_eq!(args.to_chat().unwrap().stream, Some(false));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let overrides = ChatOverrides {
            provider: Some("acme".into()),
            ..Default::default()
        };
        let err = overrides.apply(Chat::new("c")).unwrap_err();
        assert!(err.to_string().contains("Invalid provider: acme"));
    }

    #[test]
    fn test_resolve_args() {
        let cli = Cli::parse_from(["palaver", "resolve", "--provider", "LMStudio"]);
        let Commands::Resolve(args) = cli.command else {
            panic!("expected resolve");
        };
        let chat = args.overrides.apply(Chat::new("c")).unwrap();
        assert_eq!(chat.provider, Some(ProviderKind::LMStudio));
    }

    #[test]
    fn test_parse_variable() {
        assert_eq!(
            parse_variable("language=French").unwrap(),
            ("language".to_string(), "French".to_string())
        );
        assert_eq!(
            parse_variable("eq=a=b").unwrap(),
            ("eq".to_string(), "a=b".to_string())
        );
        assert!(parse_variable("novalue").is_err());
        assert!(parse_variable("=x").is_err());
    }

    #[test]
    fn test_knowledge_alias() {
        let cli = Cli::parse_from(["palaver", "kb", "search", "docs", "rust", "-l", "3"]);
        let Commands::Knowledge(args) = cli.command else {
            panic!("expected knowledge");
        };
        assert!(matches!(
            args.command,
            KnowledgeCommands::Search { limit: Some(3), .. }
        ));
    }
}
