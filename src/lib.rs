// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Palaver - one chat interface over many LLM backends.
//!
//! A turn flows through:
//! - `chat::context`: resolve provider, model and parameters for the chat
//! - `llm::factory`: pick the backend for the resolved provider
//! - `knowledge`: optionally expand the prompt with retrieved chunks
//! - `chat::session`: stream the turn and report it to an observer
//! - `knowledge::citation`: match the reply's citations to the chunks
//!
//! `chat::engine` runs that sequence against a message store.

pub mod catalog;
pub mod chat;
pub mod cli;
pub mod config;
pub mod error;
pub mod knowledge;
pub mod llm;

pub use error::{PalaverError, Result};
