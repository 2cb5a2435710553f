//! Retrieval adapter seam and fact-bundle construction.
//!
//! The pipeline never talks to a vector index directly. It goes through
//! [`Retriever`], which the app crate implements over SQLite and the
//! tests implement over [`InMemoryIndex`](crate::memory::InMemoryIndex).

use async_trait::async_trait;
use tracing::debug;

use crate::error::RetrievalError;
use crate::models::{Collection, FactBundle, RetrievedItem};

/// Semantic lookup against an external index.
///
/// Implementations return at most `limit` items ordered by decreasing
/// similarity to `query`. An empty vector means nothing matched and is
/// not an error.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        collection: Collection,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, RetrievalError>;
}

/// Outcome of building a [`FactBundle`].
#[derive(Debug)]
pub struct BundleOutcome {
    pub bundle: FactBundle,
    /// Collections whose retrieval call failed, with the error.
    pub failures: Vec<(Collection, RetrievalError)>,
}

/// Query risks, controls, and standards for `query`, one call each in that order.
///
/// Risks and controls contribute their document text; standards contribute
/// `"{document} - {description}"`. A failed call leaves its slot empty and
/// is reported in [`BundleOutcome::failures`] so the caller can decide
/// whether to abort.
pub async fn build_fact_bundle<R: Retriever + ?Sized>(
    retriever: &R,
    query: &str,
    limit: usize,
) -> BundleOutcome {
    let mut bundle = FactBundle::default();
    let mut failures = Vec::new();

    for collection in Collection::FACTS {
        match retriever.retrieve(collection, query, limit).await {
            Ok(items) => {
                if let Some(slot) = bundle.slot_mut(collection) {
                    slot.extend(items.into_iter().map(|item| fact_text(collection, item)));
                }
            }
            Err(e) => {
                debug!(collection = %collection, error = %e, "retrieval failed");
                failures.push((collection, e));
            }
        }
    }

    BundleOutcome { bundle, failures }
}

fn fact_text(collection: Collection, item: RetrievedItem) -> String {
    match collection {
        Collection::Standards => format!("{} - {}", item.document, item.description),
        _ => item.document,
    }
}
