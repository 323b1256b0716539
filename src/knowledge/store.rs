// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Flat-file knowledge store
//!
//! Layout under the root directory:
//!
//! ```text
//! <collection_id>/<file_id>/info.json
//! <collection_id>/<file_id>/<chunk_id>.txt
//! ```
//!
//! Search is a case-insensitive substring match over chunk text.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{CollectionFile, KnowledgeBase, KnowledgeChunk};
use crate::error::{PalaverError, Result};

const INFO_FILE: &str = "info.json";
const CHUNK_EXT: &str = "txt";

/// Knowledge collections stored as plain files
#[derive(Debug, Clone)]
pub struct FileKnowledgeStore {
    root: PathBuf,
}

/// Reject ids that would escape their directory
fn segment(id: &str) -> Result<&str> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
        && !id.contains('\0');
    if valid {
        Ok(id)
    } else {
        Err(PalaverError::Knowledge(format!("Invalid identifier: {:?}", id)))
    }
}

/// Entry names in `dir`, sorted; a missing directory has no entries
async fn sorted_entries(dir: &Path) -> Result<Vec<String>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Split plain text into chunks at blank lines
pub fn paragraphs(text: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                chunks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim_end());
        }
    }
    if !current.is_empty() {
        chunks.push(current.join("\n"));
    }
    chunks
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

impl FileKnowledgeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store a file's chunks under `collection_id`, returning them with their new ids
    pub async fn add_file(
        &self,
        collection_id: &str,
        mut file: CollectionFile,
        chunks: &[String],
    ) -> Result<Vec<KnowledgeChunk>> {
        let file_dir = self
            .root
            .join(segment(collection_id)?)
            .join(segment(&file.id)?);
        fs::create_dir_all(&file_dir).await?;

        file.num_of_chunks = chunks.len();
        fs::write(file_dir.join(INFO_FILE), serde_json::to_vec(&file)?).await?;

        let mut stored = Vec::with_capacity(chunks.len());
        for content in chunks {
            let id = uuid::Uuid::new_v4().simple().to_string();
            fs::write(file_dir.join(format!("{}.{}", id, CHUNK_EXT)), content).await?;
            stored.push(KnowledgeChunk {
                id,
                file_id: file.id.clone(),
                collection_id: collection_id.to_string(),
                content: content.clone(),
            });
        }

        tracing::debug!(
            target: "palaver.knowledge",
            collection = %collection_id,
            file = %file.name,
            chunks = stored.len(),
            "Imported file"
        );
        Ok(stored)
    }

    /// Find a chunk by id in any collection
    pub async fn get_chunk(&self, id: &str) -> Result<Option<KnowledgeChunk>> {
        let chunk_name = format!("{}.{}", segment(id)?, CHUNK_EXT);
        for collection_id in sorted_entries(&self.root).await? {
            let collection_dir = self.root.join(&collection_id);
            for file_id in sorted_entries(&collection_dir).await? {
                let path = collection_dir.join(&file_id).join(&chunk_name);
                if fs::try_exists(&path).await.unwrap_or(false) {
                    return Ok(Some(KnowledgeChunk {
                        id: id.to_string(),
                        file_id,
                        collection_id,
                        content: fs::read_to_string(&path).await?,
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Delete one chunk; false when it does not exist
    pub async fn remove_chunk(&self, id: &str) -> Result<bool> {
        let chunk_name = format!("{}.{}", segment(id)?, CHUNK_EXT);
        for collection_id in sorted_entries(&self.root).await? {
            let collection_dir = self.root.join(&collection_id);
            for file_id in sorted_entries(&collection_dir).await? {
                let path = collection_dir.join(&file_id).join(&chunk_name);
                if fs::try_exists(&path).await.unwrap_or(false) {
                    fs::remove_file(&path).await?;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Delete a file and all of its chunks; false when it does not exist
    pub async fn remove_file(&self, file_id: &str) -> Result<bool> {
        let file_id = segment(file_id)?;
        for collection_id in sorted_entries(&self.root).await? {
            let file_dir = self.root.join(&collection_id).join(file_id);
            if is_dir(&file_dir).await {
                fs::remove_dir_all(&file_dir).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Delete a whole collection; false when it does not exist
    pub async fn remove_collection(&self, collection_id: &str) -> Result<bool> {
        let dir = self.root.join(segment(collection_id)?);
        if !is_dir(&dir).await {
            return Ok(false);
        }
        fs::remove_dir_all(&dir).await?;
        Ok(true)
    }

    async fn read_info(&self, file_dir: &Path) -> Result<CollectionFile> {
        let raw = fs::read_to_string(file_dir.join(INFO_FILE)).await?;
        serde_json::from_str(&raw).map_err(|e| {
            PalaverError::Knowledge(format!("Malformed {}: {}", file_dir.display(), e))
        })
    }
}

#[async_trait]
impl KnowledgeBase for FileKnowledgeStore {
    async fn search(
        &self,
        collection_ids: &[String],
        query: &str,
        limit: usize,
    ) -> Result<Vec<KnowledgeChunk>> {
        let needle = query.to_lowercase();
        let mut results = Vec::new();
        if limit == 0 {
            return Ok(results);
        }

        for collection_id in collection_ids {
            let collection_dir = self.root.join(segment(collection_id)?);
            for file_id in sorted_entries(&collection_dir).await? {
                let file_dir = collection_dir.join(&file_id);
                if !is_dir(&file_dir).await {
                    continue;
                }
                for name in sorted_entries(&file_dir).await? {
                    let Some(chunk_id) = name.strip_suffix(".txt") else {
                        continue;
                    };
                    let content = fs::read_to_string(file_dir.join(&name)).await?;
                    if !content.to_lowercase().contains(&needle) {
                        continue;
                    }
                    results.push(KnowledgeChunk {
                        id: chunk_id.to_string(),
                        file_id: file_id.clone(),
                        collection_id: collection_id.clone(),
                        content,
                    });
                    if results.len() >= limit {
                        return Ok(results);
                    }
                }
            }
        }

        Ok(results)
    }

    async fn files(&self, file_ids: &[String]) -> Result<Vec<CollectionFile>> {
        let mut found = Vec::new();
        for file_id in file_ids {
            let file_id = segment(file_id)?;
            for collection_id in sorted_entries(&self.root).await? {
                let file_dir = self.root.join(&collection_id).join(file_id);
                if is_dir(&file_dir).await {
                    found.push(self.read_info(&file_dir).await?);
                    break;
                }
            }
        }
        Ok(found)
    }
}
