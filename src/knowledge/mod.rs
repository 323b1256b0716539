// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Knowledge retrieval and citations
//!
//! Prompts in chats with attached collections are expanded with retrieved
//! chunks and an instruction to cite them as
//! `[(<seqNo>)](citation#<id> '<file>')`. After the turn, the citations in the
//! reply are matched back to the chunks that were actually retrieved.

pub mod augment;
pub mod citation;
pub mod store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use augment::{Augmentation, KnowledgeAugmenter, DEFAULT_SEARCH_LIMIT};
pub use citation::{extract_citation_ids, reconcile, CitedChunk, Citations};
pub use store::{paragraphs, FileKnowledgeStore};

/// A retrieved text unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeChunk {
    pub id: String,
    pub file_id: String,
    pub collection_id: String,
    pub content: String,
}

/// A file imported into a collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(rename = "type", default)]
    pub file_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub num_of_chunks: usize,
}

impl CollectionFile {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            size: 0,
            file_type: String::new(),
            path: None,
            num_of_chunks: 0,
        }
    }
}

/// Search over knowledge collections
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Chunks matching `query` in any of `collection_ids`, at most `limit`.
    /// An empty collection list yields no chunks.
    async fn search(
        &self,
        collection_ids: &[String],
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>>;

    /// Descriptors for the given file ids; unknown ids are skipped
    async fn files(&self, file_ids: &[String]) -> Result<Vec<CollectionFile>>;
}
