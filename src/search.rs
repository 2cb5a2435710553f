use anyhow::Result;
use gap_harness_core::models::Collection;
use gap_harness_core::retrieval::Retriever;

use crate::config::Config;
use crate::index::SqliteIndex;

/// Query one collection through the same retriever the pipeline uses.
pub async fn run_search(
    config: &Config,
    collection: Collection,
    query: &str,
    limit: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let index = SqliteIndex::open(config).await?;
    let limit = limit.unwrap_or(config.retrieval.limit);
    let items = index.retrieve(collection, query, limit).await?;
    index.close().await;

    if items.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, item) in items.iter().enumerate() {
        println!("{}. [{}] {}", i + 1, collection, item.document);
        if !item.description.is_empty() && item.description != item.document {
            println!("    {}", item.description);
        }
    }
    Ok(())
}
