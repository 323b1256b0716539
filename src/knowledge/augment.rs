// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Prompt augmentation with retrieved chunks

use serde::Serialize;

use super::{CollectionFile, KnowledgeBase, KnowledgeChunk};
use crate::chat::types::Chat;

/// Chunks retrieved per prompt unless configured otherwise
pub const DEFAULT_SEARCH_LIMIT: usize = 6;

const CONTEXT_PREAMBLE: &str = r#"
# Context #
Please read carefully and use the following context information in JSON format to answer questions.
The context format is {"seqNo": number, "id": "id", "file":"fileName", "content": "content"}.
When using context information in your response, output the reference as `[(<seqNo>)](citation#<id> '<file>')` strictly after the relevant content.
---------------------------------------------------
For example:
the context information is: {"seqNo": 1, "id": "432939KFD83242", "file":"Fruit Encyclopedia", "content": "apples are one of common fruit"}.
and the question is: "What are some common fruits?".
The answer should be:
"According to the information provided, apples are a common fruit [(1)](citation#432939KFD83242 'Fruit Encyclopedia')."
---------------------------------------------------
Ensure that the context information is accurately referenced, and label it as [(<seqNo>)](citation#<id> '<file>') when a piece of information is actually used.
"#;

/// The prompt to send plus what was retrieved for it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Augmentation {
    pub prompt: String,
    pub chunks: Vec<KnowledgeChunk>,
    pub files: Vec<CollectionFile>,
}

impl Augmentation {
    /// The prompt unchanged, nothing retrieved
    pub fn identity(prompt: &str) -> Self {
        Self {
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContextEntry<'a> {
    seq_no: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<&'a str>,
    id: &'a str,
    content: &'a str,
}

/// Expands prompts for chats with attached knowledge collections
pub struct KnowledgeAugmenter<'a> {
    knowledge: &'a dyn KnowledgeBase,
    limit: usize,
}

impl<'a> KnowledgeAugmenter<'a> {
    pub fn new(knowledge: &'a dyn KnowledgeBase) -> Self {
        Self {
            knowledge,
            limit: DEFAULT_SEARCH_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Augment `raw_prompt` for `chat`.
    ///
    /// Chats without collections get the prompt back unchanged. Retrieval
    /// failures are logged and also yield the unchanged prompt.
    pub async fn augment(&self, chat: &Chat, raw_prompt: &str) -> Augmentation {
        if !chat.has_knowledge() {
            return Augmentation::identity(raw_prompt);
        }

        let chunks = match self
            .knowledge
            .search(&chat.knowledge_collection_ids, raw_prompt, self.limit)
            .await
        {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(
                    target: "palaver.knowledge",
                    chat_id = %chat.id,
                    error = %e,
                    "Knowledge search failed, sending prompt without context"
                );
                return Augmentation::identity(raw_prompt);
            }
        };

        let mut file_ids: Vec<String> = Vec::new();
        for chunk in &chunks {
            if !file_ids.contains(&chunk.file_id) {
                file_ids.push(chunk.file_id.clone());
            }
        }
        let files = match self.knowledge.files(&file_ids).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(target: "palaver.knowledge", error = %e, "Could not resolve chunk files");
                Vec::new()
            }
        };

        tracing::debug!(
            target: "palaver.knowledge",
            chat_id = %chat.id,
            collections = chat.knowledge_collection_ids.len(),
            chunks = chunks.len(),
            files = files.len(),
            "Augmented prompt"
        );

        Augmentation {
            prompt: build_augmented_prompt(raw_prompt, &chunks, &files),
            chunks,
            files,
        }
    }
}

/// The instruction prompt embedding `chunks` numbered from 1 in retrieval order
pub fn build_augmented_prompt(
    prompt: &str,
    chunks: &[KnowledgeChunk],
    files: &[CollectionFile],
) -> String {
    let entries: Vec<ContextEntry<'_>> = chunks
        .iter()
        .enumerate()
        .map(|(idx, chunk)| ContextEntry {
            seq_no: idx + 1,
            file: files
                .iter()
                .find(|f| f.id == chunk.file_id)
                .map(|f| f.name.as_str()),
            id: &chunk.id,
            content: &chunk.content,
        })
        .collect();
    let context = serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string());

    format!("{}{}\n\n# Objective #\n{}\n", CONTEXT_PREAMBLE, context, prompt)
}
