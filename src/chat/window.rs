// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! History window selection
//!
//! The last message in a chat's list is always the one being answered, so it
//! never counts as history. A retry anchors the list at the retried message
//! first; everything after the anchor is ignored.

use crate::chat::types::ChatMessage;
use crate::llm::message::Message;

/// Prior messages to send as history for the turn answering the last message
pub fn select_context_messages<'a>(
    messages: &'a [ChatMessage],
    max_ctx_messages: i32,
    anchor_message_id: Option<&str>,
) -> &'a [ChatMessage] {
    if max_ctx_messages <= 0 {
        return &[];
    }

    let messages = match anchor_message_id
        .and_then(|anchor| messages.iter().position(|m| m.id == anchor))
    {
        Some(index) => &messages[..=index],
        None => messages,
    };

    let Some(last) = messages.len().checked_sub(1) else {
        return &[];
    };
    let window = max_ctx_messages as usize;
    &messages[last.saturating_sub(window)..last]
}

/// Expand history into user/assistant pairs followed by the new prompt
pub fn build_request_messages(history: &[ChatMessage], prompt: &str) -> Vec<Message> {
    history
        .iter()
        .flat_map(|m| {
            let reply = (!m.reply.trim().is_empty()).then(|| Message::assistant(m.reply.clone()));
            std::iter::once(Message::user(m.prompt.clone())).chain(reply)
        })
        .chain(std::iter::once(Message::user(prompt)))
        .collect()
}
