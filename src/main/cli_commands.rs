// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::io::{self, Write};
use std::sync::Arc;

use palaver::catalog::{ProviderCatalog, ProviderKind};
use palaver::chat::{ChatEngine, MemoryMessageStore, TurnObserver, TurnOutcome};
use palaver::cli::{AskArgs, KnowledgeArgs, KnowledgeCommands, ProvidersArgs, ResolveArgs};
use palaver::config::{default_api_key_env, Settings};
use palaver::error::{PalaverError, Result};
use palaver::knowledge::{paragraphs, CollectionFile, FileKnowledgeStore, KnowledgeBase};
use palaver::llm::providers::OllamaBackend;

/// Prints reply text to stdout and reasoning and tool calls to stderr
struct TerminalObserver {
    reasoning_open: bool,
}

impl TurnObserver for TerminalObserver {
    fn on_reading(&mut self, content: &str, reasoning: Option<&str>) {
        if let Some(reasoning) = reasoning.filter(|r| !r.is_empty()) {
            self.reasoning_open = true;
            eprint!("{}", reasoning);
        }
        if !content.is_empty() {
            if self.reasoning_open {
                self.reasoning_open = false;
                eprintln!();
            }
            print!("{}", content);
            let _ = io::stdout().flush();
        }
    }

    fn on_tool_calls(&mut self, tool_name: &str) {
        eprintln!("\n[tool] {}", tool_name);
    }
}

/// Ask a single question
pub(super) async fn run_ask(args: AskArgs, settings: Settings) -> Result<()> {
    let chat = args.to_chat()?;
    let catalog = ProviderCatalog::builtin();
    let knowledge = Arc::new(FileKnowledgeStore::new(settings.knowledge_dir()));
    let store = Arc::new(MemoryMessageStore::new());
    let engine = Arc::new(ChatEngine::new(catalog, settings, store, knowledge));

    let context = engine.resolve(&chat);
    if let Some(template) = &chat.prompt {
        if !template.is_applicable_to(context.model().display_name()) {
            eprintln!(
                "[warning] template '{}' is not meant for {}",
                template.name,
                context.model().display_name()
            );
        }
    }
    if !engine.settings().is_provider_configured(context.provider()) {
        return Err(PalaverError::Config(format!(
            "{} is not configured. Set {} or add an API key and endpoint to settings.",
            context.provider_kind(),
            default_api_key_env(context.provider_kind())
        )));
    }

    let interrupt = {
        let engine = Arc::clone(&engine);
        let chat_id = chat.id.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.abort(&chat_id);
            }
        })
    };

    let mut observer = TerminalObserver {
        reasoning_open: false,
    };
    let input = args.input(&chat);
    let summary = engine.submit(&chat, &input, None, &mut observer).await;
    interrupt.abort();
    let summary = summary?;

    // Always terminate the reply with a newline.
    println!();

    match summary.outcome {
        TurnOutcome::Failed { error, .. } => return Err(error),
        TurnOutcome::Aborted(_) => eprintln!("[aborted]"),
        TurnOutcome::Completed(_) => {}
    }

    if !summary.citations.files.is_empty() {
        println!("\nSources:");
        for (idx, file) in summary.citations.files.iter().enumerate() {
            println!("  [{}] {}", idx + 1, file);
        }
    }

    Ok(())
}

/// List providers, marking the active one
pub(super) async fn run_providers(args: ProvidersArgs, settings: &Settings) -> Result<()> {
    let catalog = ProviderCatalog::builtin();

    for provider in catalog.providers() {
        let marker = if provider.kind == settings.defaults.provider {
            "*"
        } else {
            " "
        };
        let status = if settings.is_provider_configured(&provider) {
            "configured"
        } else {
            "not configured"
        };
        let default_model = settings
            .provider(provider.kind)
            .default_model
            .or_else(|| provider.default_model().map(|m| m.name.clone()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{} {:<12} {:<15} {:>3} models  default: {}",
            marker,
            provider.name(),
            status,
            provider.models.len(),
            default_model
        );
    }

    if args.local {
        let ollama = OllamaBackend::with_base_url(
            settings.base_url(&catalog.get(ProviderKind::Ollama)),
        );
        match ollama.list_local_models().await {
            Ok(models) if models.is_empty() => println!("\nNo local Ollama models"),
            Ok(models) => {
                println!("\nLocal Ollama models:");
                for model in models {
                    println!("  {}", model);
                }
            }
            Err(e) => eprintln!("\nCould not list Ollama models: {}", e),
        }
    }

    Ok(())
}

/// Print the effective context as JSON
pub(super) fn run_resolve(args: ResolveArgs, settings: &Settings) -> Result<()> {
    let chat = args.overrides.apply(palaver::chat::Chat::create())?;
    let catalog = ProviderCatalog::builtin();
    let context = palaver::chat::ChatContextResolver::new(&catalog, settings).resolve(&chat);

    let output = serde_json::json!({
        "provider": context.provider_kind(),
        "model": context.model().name,
        "modelLabel": context.model().display_name(),
        "systemMessage": context.system_message(),
        "temperature": context.temperature(),
        "maxTokens": context.max_tokens(),
        "maxCtxMessages": context.max_ctx_messages(),
        "stream": context.stream(),
        "toolEnabled": context.tool_enabled(),
        "configured": settings.is_provider_configured(context.provider()),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Knowledge collection management
pub(super) async fn run_knowledge_command(args: KnowledgeArgs, settings: &Settings) -> Result<()> {
    let store = FileKnowledgeStore::new(settings.knowledge_dir());

    match args.command {
        KnowledgeCommands::Import { collection, file } => {
            let text = tokio::fs::read_to_string(&file).await?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            let mut descriptor =
                CollectionFile::new(uuid::Uuid::new_v4().simple().to_string(), name);
            descriptor.size = text.len() as u64;
            descriptor.file_type = file
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            descriptor.path = Some(file.display().to_string());

            let chunks = paragraphs(&text);
            if chunks.is_empty() {
                return Err(PalaverError::InvalidInput(format!(
                    "{} has no text to import",
                    file.display()
                )));
            }
            let stored = store.add_file(&collection, descriptor, &chunks).await?;
            println!(
                "Imported {} chunks from {} into '{}'",
                stored.len(),
                file.display(),
                collection
            );
        }
        KnowledgeCommands::Search {
            collection,
            query,
            limit,
        } => {
            let limit = limit.unwrap_or(settings.knowledge.search_limit);
            let chunks = store.search(&[collection], &query, limit).await?;
            println!("{}", serde_json::to_string_pretty(&chunks)?);
        }
        KnowledgeCommands::Remove { collection } => {
            if store.remove_collection(&collection).await? {
                println!("Removed collection '{}'", collection);
            } else {
                println!("No collection named '{}'", collection);
            }
        }
    }

    Ok(())
}
