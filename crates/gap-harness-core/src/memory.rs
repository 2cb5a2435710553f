//! In-memory [`Retriever`] for tests and embedding-free runs.
//!
//! Items live in a `Vec` behind `std::sync::RwLock`. Ranking is
//! [`keyword_score`] over the document and description; items that share
//! no query term are not returned.

use std::collections::HashSet;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::RetrievalError;
use crate::models::{Collection, RetrievedItem};
use crate::retrieval::Retriever;
use crate::scoring::keyword_score;

struct StoredItem {
    collection: Collection,
    document: String,
    description: String,
}

/// In-memory index keyed by collection.
pub struct InMemoryIndex {
    items: RwLock<Vec<StoredItem>>,
    failing: RwLock<HashSet<Collection>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            failing: RwLock::new(HashSet::new()),
        }
    }

    pub fn insert(&self, collection: Collection, document: &str, description: &str) {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.push(StoredItem {
            collection,
            document: document.to_string(),
            description: description.to_string(),
        });
    }

    /// Make every query against `collection` fail, simulating an outage.
    pub fn fail_on(&self, collection: Collection) {
        let mut failing = self.failing.write().unwrap_or_else(|e| e.into_inner());
        failing.insert(collection);
    }

    pub fn len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Retriever for InMemoryIndex {
    async fn retrieve(
        &self,
        collection: Collection,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, RetrievalError> {
        let failing = self
            .failing
            .read()
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;
        if failing.contains(&collection) {
            return Err(RetrievalError::Query {
                collection,
                message: "simulated outage".to_string(),
            });
        }

        let items = self
            .items
            .read()
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        let mut scored: Vec<(f64, &StoredItem)> = items
            .iter()
            .filter(|item| item.collection == collection)
            .map(|item| {
                let text = format!("{} {}", item.document, item.description);
                (keyword_score(query, &text), item)
            })
            .filter(|(score, _)| *score > 0.0)
            .collect();

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(_, item)| RetrievedItem {
                document: item.document.clone(),
                description: item.description.clone(),
            })
            .collect())
    }
}
