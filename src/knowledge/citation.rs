// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Citation reconciliation

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{CollectionFile, KnowledgeChunk};

/// A cited chunk as persisted with the message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitedChunk {
    pub seq_no: usize,
    pub content: String,
    pub id: String,
}

/// What a reply actually cited
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Citations {
    /// Names of the files the cited chunks came from
    pub files: Vec<String>,
    /// Cited chunks renumbered from 1
    pub chunks: Vec<CitedChunk>,
}

impl Citations {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// File names as a JSON array
    pub fn files_json(&self) -> String {
        serde_json::to_string(&self.files).unwrap_or_else(|_| "[]".to_string())
    }

    /// Chunks as a JSON array of `{seqNo, content, id}`
    pub fn chunks_json(&self) -> String {
        serde_json::to_string(&self.chunks).unwrap_or_else(|_| "[]".to_string())
    }
}

fn citation_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"citation#([^\s'"()\[\]]+)"#).unwrap())
}

/// Chunk ids referenced as `citation#<id>`, deduplicated, first seen first
pub fn extract_citation_ids(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    citation_pattern()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Match the citations in `reply` against the chunks retrieved for the turn
pub fn reconcile(reply: &str, chunks: &[KnowledgeChunk], files: &[CollectionFile]) -> Citations {
    let cited: Vec<&KnowledgeChunk> = extract_citation_ids(reply)
        .iter()
        .filter_map(|id| chunks.iter().find(|chunk| &chunk.id == id))
        .collect();

    let mut file_ids: Vec<&str> = Vec::new();
    for chunk in &cited {
        if !file_ids.contains(&chunk.file_id.as_str()) {
            file_ids.push(&chunk.file_id);
        }
    }
    let file_names = file_ids
        .iter()
        .filter_map(|id| files.iter().find(|f| f.id == *id))
        .map(|f| f.name.clone())
        .collect();

    Citations {
        files: file_names,
        chunks: cited
            .into_iter()
            .enumerate()
            .map(|(idx, chunk)| CitedChunk {
                seq_no: idx + 1,
                content: chunk.content.clone(),
                id: chunk.id.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, file_id: &str) -> KnowledgeChunk {
        KnowledgeChunk {
            id: id.to_string(),
            file_id: file_id.to_string(),
            collection_id: "col".to_string(),
            content: format!("content of {}", id),
        }
    }

    #[test]
    fn test_extract_citation_ids() {
        let text = "Apples [(1)](citation#A 'Fruit') and pears [(2)](citation#C 'Fruit'). Again [(1)](citation#A 'Fruit').";
        assert_eq!(extract_citation_ids(text), vec!["A", "C"]);
    }

    #[test]
    fn test_extract_citation_ids_none() {
        assert!(extract_citation_ids("no markers here").is_empty());
        assert!(extract_citation_ids("citation#").is_empty());
    }

    #[test]
    fn test_extract_stops_at_markup_delimiters() {
        assert_eq!(
            extract_citation_ids("[(1)](citation#abc-123)"),
            vec!["abc-123"]
        );
    }

    #[test]
    fn test_reconcile_keeps_cited_only() {
        let chunks = vec![chunk("A", "f1"), chunk("B", "f2"), chunk("C", "f1")];
        let files = vec![
            CollectionFile::new("f1", "fruit.md"),
            CollectionFile::new("f2", "veg.md"),
        ];
        let reply = "x [(3)](citation#C 'fruit.md') y [(1)](citation#A 'fruit.md')";
        let citations = reconcile(reply, &chunks, &files);

        let ids: Vec<&str> = citations.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A"]);
        assert_eq!(citations.chunks[0].seq_no, 1);
        assert_eq!(citations.chunks[1].seq_no, 2);
        assert_eq!(citations.files, vec!["fruit.md"]);
    }

    #[test]
    fn test_reconcile_ignores_unknown_ids() {
        let chunks = vec![chunk("A", "f1")];
        let citations = reconcile("[(1)](citation#Z 'x')", &chunks, &[]);
        assert!(citations.is_empty());
        assert!(citations.files.is_empty());
    }

    #[test]
    fn test_json_shapes() {
        let citations = Citations {
            files: vec!["a.md".into()],
            chunks: vec![CitedChunk {
                seq_no: 1,
                content: "text".into(),
                id: "k1".into(),
            }],
        };
        assert_eq!(citations.files_json(), r#"["a.md"]"#);
        assert_eq!(
            citations.chunks_json(),
            r#"[{"seqNo":1,"content":"text","id":"k1"}]"#
        );
        assert_eq!(Citations::default().chunks_json(), "[]");
    }
}
