//! Local SQLite index over RCM items.
//!
//! `gap index` loads an RCM file, upserts every item into `items`, and,
//! when an embedding provider is configured, embeds the items whose
//! content hash changed since the last run. [`SqliteIndex`] serves the
//! pipeline's [`Retriever`] seam from the same tables.
//!
//! # Retrieval modes
//!
//! | Mode | Scoring |
//! |------|---------|
//! | `keyword` | fraction of query terms found in `document + description` |
//! | `semantic` | cosine similarity against stored vectors |
//! | `auto` | semantic when an embedder is configured and the collection has vectors, else keyword |

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;
use gap_harness_core::error::RetrievalError;
use gap_harness_core::models::{Collection, RetrievedItem};
use gap_harness_core::retrieval::Retriever;
use gap_harness_core::scoring::{blob_to_vec, cosine_similarity, keyword_score, vec_to_blob};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::rcm::{self, IndexItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Auto,
    Semantic,
    Keyword,
}

impl RetrievalMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "semantic" => Self::Semantic,
            "keyword" => Self::Keyword,
            _ => Self::Auto,
        }
    }
}

/// Counts reported by an indexing run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub items: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub embedded: usize,
    pub embed_failed: usize,
}

fn content_hash(item: &IndexItem) -> String {
    let mut hasher = Sha256::new();
    hasher.update(item.collection.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(item.name.as_bytes());
    hasher.update([0]);
    hasher.update(item.document.as_bytes());
    hasher.update([0]);
    hasher.update(item.description.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Load `rcm_path` into the index and print a summary.
pub async fn run_index(config: &Config, rcm_path: &Path) -> Result<()> {
    let processes = rcm::load_rcm(rcm_path)?;
    let items = rcm::flatten(&processes);
    let embedder = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;

    let report = index_items(
        &pool,
        &items,
        embedder.as_deref(),
        config.embedding.batch_size,
    )
    .await?;

    println!("index {}", rcm_path.display());
    println!("  processes: {}", processes.len());
    println!("  items: {}", report.items);
    println!("  inserted: {}", report.inserted);
    println!("  updated: {}", report.updated);
    println!("  unchanged: {}", report.unchanged);
    println!("  removed: {}", report.removed);
    if embedder.is_some() {
        println!("  embedded: {}", report.embedded);
        println!("  embed failed: {}", report.embed_failed);
    } else {
        println!("  embeddings: disabled (keyword retrieval)");
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Upsert `items`, drop rows that are no longer present, and embed stale items.
pub async fn index_items(
    pool: &SqlitePool,
    items: &[IndexItem],
    embedder: Option<&dyn EmbeddingProvider>,
    batch_size: usize,
) -> Result<IndexReport> {
    let mut report = IndexReport {
        items: items.len(),
        ..Default::default()
    };
    let now = chrono::Utc::now().timestamp();

    let mut tx = pool.begin().await?;
    for item in items {
        let hash = content_hash(item);
        let existing: Option<String> =
            sqlx::query_scalar("SELECT content_hash FROM items WHERE id = ?")
                .bind(&item.id)
                .fetch_optional(&mut *tx)
                .await?;

        match existing.as_deref() {
            Some(h) if h == hash => {
                report.unchanged += 1;
                continue;
            }
            Some(_) => report.updated += 1,
            None => report.inserted += 1,
        }

        sqlx::query(
            r#"
            INSERT INTO items (id, collection, name, document, description, metadata_json, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                collection = excluded.collection,
                name = excluded.name,
                document = excluded.document,
                description = excluded.description,
                metadata_json = excluded.metadata_json,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id)
        .bind(item.collection.as_str())
        .bind(&item.name)
        .bind(&item.document)
        .bind(&item.description)
        .bind(serde_json::Value::Object(item.metadata.clone()).to_string())
        .bind(&hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    let keep: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
    let known: Vec<String> = sqlx::query_scalar("SELECT id FROM items")
        .fetch_all(&mut *tx)
        .await?;
    for id in known.iter().filter(|id| !keep.contains(id.as_str())) {
        sqlx::query("DELETE FROM item_vectors WHERE item_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        report.removed += 1;
    }
    tx.commit().await?;

    info!(
        items = report.items,
        inserted = report.inserted,
        updated = report.updated,
        removed = report.removed,
        "items indexed"
    );

    if let Some(embedder) = embedder {
        let (embedded, failed) = embed_stale(pool, embedder, batch_size).await?;
        report.embedded = embedded;
        report.embed_failed = failed;
    }

    Ok(report)
}

struct PendingItem {
    id: String,
    document: String,
    content_hash: String,
}

/// Embed items with no vector for this model, or whose vector is out of date.
async fn embed_stale(
    pool: &SqlitePool,
    embedder: &dyn EmbeddingProvider,
    batch_size: usize,
) -> Result<(usize, usize)> {
    let model = embedder.model_name().to_string();
    let rows = sqlx::query(
        r#"
        SELECT i.id, i.document, i.content_hash
        FROM items i
        LEFT JOIN item_vectors v ON v.item_id = i.id AND v.model = ?
        WHERE v.item_id IS NULL OR v.content_hash != i.content_hash
        ORDER BY i.id
        "#,
    )
    .bind(&model)
    .fetch_all(pool)
    .await?;

    let pending: Vec<PendingItem> = rows
        .iter()
        .map(|row| PendingItem {
            id: row.get("id"),
            document: row.get("document"),
            content_hash: row.get("content_hash"),
        })
        .collect();

    let mut embedded = 0;
    let mut failed = 0;
    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.document.clone()).collect();
        match embedder.embed(&texts).await {
            Ok(vectors) if vectors.len() == batch.len() => {
                for (item, vector) in batch.iter().zip(vectors.iter()) {
                    sqlx::query(
                        r#"
                        INSERT INTO item_vectors (item_id, model, dims, content_hash, embedding)
                        VALUES (?, ?, ?, ?, ?)
                        ON CONFLICT(item_id) DO UPDATE SET
                            model = excluded.model,
                            dims = excluded.dims,
                            content_hash = excluded.content_hash,
                            embedding = excluded.embedding
                        "#,
                    )
                    .bind(&item.id)
                    .bind(&model)
                    .bind(vector.len() as i64)
                    .bind(&item.content_hash)
                    .bind(vec_to_blob(vector))
                    .execute(pool)
                    .await?;
                    embedded += 1;
                }
            }
            Ok(vectors) => {
                warn!(
                    expected = batch.len(),
                    received = vectors.len(),
                    "embedding batch size mismatch"
                );
                failed += batch.len();
            }
            Err(e) => {
                warn!(error = %e, batch = batch.len(), "embedding batch failed");
                failed += batch.len();
            }
        }
    }

    Ok((embedded, failed))
}

/// [`Retriever`] over the local SQLite index.
pub struct SqliteIndex {
    pool: SqlitePool,
    embedder: Option<Box<dyn EmbeddingProvider>>,
    mode: RetrievalMode,
}

impl SqliteIndex {
    pub fn new(
        pool: SqlitePool,
        embedder: Option<Box<dyn EmbeddingProvider>>,
        mode: RetrievalMode,
    ) -> Self {
        Self {
            pool,
            embedder,
            mode,
        }
    }

    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        let embedder = embedding::create_provider(&config.embedding)?;
        Ok(Self::new(
            pool,
            embedder,
            RetrievalMode::parse(&config.retrieval.mode),
        ))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn keyword_search(
        &self,
        collection: Collection,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, RetrievalError> {
        let rows = sqlx::query(
            "SELECT document, description FROM items WHERE collection = ? ORDER BY id",
        )
        .bind(collection.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error(collection, e))?;

        let mut scored: Vec<(f64, RetrievedItem)> = rows
            .iter()
            .filter_map(|row| {
                let item = RetrievedItem {
                    document: row.get("document"),
                    description: row.get("description"),
                };
                let score = keyword_score(
                    query,
                    &format!("{} {}", item.document, item.description),
                );
                (score > 0.0).then_some((score, item))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored.into_iter().map(|(_, item)| item).collect())
    }

    async fn vector_search(
        &self,
        embedder: &dyn EmbeddingProvider,
        collection: Collection,
        query: &str,
        limit: usize,
    ) -> Result<Option<Vec<RetrievedItem>>, RetrievalError> {
        let rows = sqlx::query(
            r#"
            SELECT i.document, i.description, v.embedding
            FROM item_vectors v
            JOIN items i ON i.id = v.item_id
            WHERE i.collection = ? AND v.model = ?
            "#,
        )
        .bind(collection.as_str())
        .bind(embedder.model_name())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error(collection, e))?;

        if rows.is_empty() {
            return Ok(None);
        }

        let query_vec = embedding::embed_query(embedder, query)
            .await
            .map_err(|e| RetrievalError::Query {
                collection,
                message: format!("query embedding failed: {}", e),
            })?;

        let mut scored: Vec<(f32, RetrievedItem)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(&query_vec, &blob_to_vec(&blob));
                let item = RetrievedItem {
                    document: row.get("document"),
                    description: row.get("description"),
                };
                (similarity, item)
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(Some(scored.into_iter().map(|(_, item)| item).collect()))
    }
}

fn query_error(collection: Collection, err: sqlx::Error) -> RetrievalError {
    match err {
        sqlx::Error::Database(db) if db.message().contains("no such table") => {
            RetrievalError::Unavailable(format!("{} (run `gap init` first)", db.message()))
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RetrievalError::Unavailable(err.to_string())
        }
        other => RetrievalError::Query {
            collection,
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl Retriever for SqliteIndex {
    async fn retrieve(
        &self,
        collection: Collection,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, RetrievalError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let embedder = match self.mode {
            RetrievalMode::Keyword => None,
            RetrievalMode::Auto | RetrievalMode::Semantic => self.embedder.as_deref(),
        };

        if let Some(embedder) = embedder {
            match self.vector_search(embedder, collection, query, limit).await? {
                Some(items) => return Ok(items),
                None if self.mode == RetrievalMode::Semantic => return Ok(Vec::new()),
                None => {
                    debug!(collection = %collection, "no vectors for collection; using keyword scoring");
                }
            }
        }

        self.keyword_search(collection, query, limit).await
    }
}
