// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Palaver CLI entry point

use anyhow::Context;
use clap::Parser;

use palaver::cli::{Cli, Commands};
use palaver::config::Settings;

#[path = "main/cli_commands.rs"]
mod cli_commands;

use cli_commands::{run_ask, run_knowledge_command, run_providers, run_resolve};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::WARN.into());

    // `-v` turns on turn diagnostics for the palaver targets.
    if cli.verbose > 0 {
        let level = if cli.verbose > 1 { "trace" } else { "debug" };
        for target in [
            "palaver.chat.context",
            "palaver.chat.engine",
            "palaver.chat.service",
            "palaver.chat.session",
            "palaver.chat.streaming",
            "palaver.knowledge",
            "palaver.llm.factory",
        ] {
            if let Ok(parsed) = format!("{}={}", target, level).parse() {
                env_filter = env_filter.add_directive(parsed);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => Settings::load().context("Failed to load settings")?,
    };

    match cli.command {
        Commands::Ask(args) => run_ask(args, settings).await?,
        Commands::Providers(args) => run_providers(args, &settings).await?,
        Commands::Resolve(args) => run_resolve(args, &settings)?,
        Commands::Knowledge(args) => run_knowledge_command(args, &settings).await?,
    }

    Ok(())
}
