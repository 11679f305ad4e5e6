//! Document index behind the internal-data retrieval function.
//!
//! The similarity engine proper is a collaborator; this module defines the
//! capability trait plus a small in-memory implementation so the binary is
//! self-contained.

use std::path::Path;

use async_trait::async_trait;

use crate::core::errors::ApiError;

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// The `k` chunks most similar to the query, best first.
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<String>, ApiError>;
}

/// In-memory index over pre-chunked documents, scored by query-term overlap.
pub struct InMemoryIndexStore {
    documents: Vec<String>,
}

impl InMemoryIndexStore {
    pub fn new(documents: Vec<String>) -> Self {
        Self { documents }
    }

    /// Loads blank-line-separated chunks from a plain-text file.
    pub fn load_from_file(path: &Path) -> Result<Self, ApiError> {
        let contents = std::fs::read_to_string(path).map_err(ApiError::internal)?;
        let documents = contents
            .split("\n\n")
            .map(str::trim)
            .filter(|chunk| !chunk.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self::new(documents))
    }

    fn score(document: &str, terms: &[String]) -> usize {
        let document = document.to_lowercase();
        terms
            .iter()
            .filter(|term| document.contains(term.as_str()))
            .count()
    }
}

#[async_trait]
impl IndexStore for InMemoryIndexStore {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<String>, ApiError> {
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut scored: Vec<(usize, &String)> = self
            .documents
            .iter()
            .map(|document| (Self::score(document, &terms), document))
            .filter(|(score, _)| *score > 0)
            .collect();

        // Stable sort keeps document order deterministic among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, document)| document.clone())
            .collect())
    }
}
