//! Direct similarity search against the RAG vector store, scoped to one
//! user, plus the query-embedding path that feeds it (§4.4 fast path +
//! DB-fallback, §4.5 similarity search).

use std::path::Path;

use async_trait::async_trait;
use rag_client::{file_id, synthetic_query_file_id, IndexRequest, RagClient, StorageMetadata};
use serde::Deserialize;
use thiserror::Error;

const OVERFETCH_FACTOR: usize = 3;
pub const EXCERPT_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum VectorQueryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("rag service error: {0}")]
    Rag(#[from] rag_client::RagError),
    #[error("could not obtain a query embedding")]
    NoEmbedding,
}

/// One row returned by a similarity search, before exclusion filtering.
#[derive(Debug, Clone)]
pub struct RawHit {
    pub custom_id: String,
    pub document: String,
    pub similarity: f64,
    pub filename: Option<String>,
}

/// A search hit ready for presentation: vault-relative path, excerpt, score.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub filename: String,
    pub excerpt: String,
    pub similarity: f64,
}

#[async_trait]
pub trait VectorSearch: Send + Sync {
    /// Run the raw `ORDER BY embedding <=> $query LIMIT $limit` query scoped
    /// to `user_id`. Returns rows in ascending-distance (best-first) order.
    async fn search_raw(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RawHit>, VectorQueryError>;

    /// Read back the embedding for a single `custom_id` row (used by the
    /// query-embedding DB-fallback path).
    async fn lookup_embedding(&self, custom_id: &str) -> Result<Option<Vec<f32>>, VectorQueryError>;
}

/// Render an `embedding <=> $1::vector` parameter in pgvector's textual form.
fn to_pgvector_literal(embedding: &[f32]) -> String {
    let mut s = String::with_capacity(embedding.len() * 8 + 2);
    s.push('[');
    for (i, v) in embedding.iter().enumerate() {
        if i > 0 {
            s.push(',');
        }
        s.push_str(&v.to_string());
    }
    s.push(']');
    s
}

/// Production [`VectorSearch`] backed by a pooled `sqlx::PgPool`, talking to
/// the `langchain_pg_embedding` table the RAG service writes into.
pub struct PgVectorSearch {
    pool: sqlx::PgPool,
}

#[derive(Deserialize)]
struct Cmetadata {
    filename: Option<String>,
}

impl PgVectorSearch {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl VectorSearch for PgVectorSearch {
    async fn search_raw(
        &self,
        user_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RawHit>, VectorQueryError> {
        let literal = to_pgvector_literal(embedding);
        let rows: Vec<(String, serde_json::Value, String, f64)> = sqlx::query_as(
            r#"
            SELECT document, cmetadata, custom_id,
                   1 - (embedding <=> $1::vector) AS similarity
            FROM   langchain_pg_embedding
            WHERE  cmetadata->>'user_id' = $2
            ORDER  BY embedding <=> $1::vector
            LIMIT  $3
            "#,
        )
        .bind(&literal)
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(document, cmetadata, custom_id, similarity)| {
                let filename = serde_json::from_value::<Cmetadata>(cmetadata)
                    .ok()
                    .and_then(|m| m.filename);
                RawHit {
                    custom_id,
                    document,
                    similarity,
                    filename,
                }
            })
            .collect())
    }

    async fn lookup_embedding(&self, custom_id: &str) -> Result<Option<Vec<f32>>, VectorQueryError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT embedding::text FROM langchain_pg_embedding WHERE custom_id = $1 LIMIT 1",
        )
        .bind(custom_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(text,)| {
            text.trim_matches(|c| c == '[' || c == ']')
                .split(',')
                .filter_map(|v| v.parse::<f32>().ok())
                .collect()
        }))
    }
}

/// Obtain an embedding for a free-text query: try the fast path first, then
/// fall back to a round-trip through the RAG service + vector DB (§4.4).
pub async fn embed_query(
    rag: &dyn RagClient,
    db: &dyn VectorSearch,
    user_id: &str,
    text: &str,
) -> Result<Vec<f32>, VectorQueryError> {
    if let Some(embedding) = rag.fast_embed(user_id, text).await? {
        return Ok(embedding);
    }

    let temp_id = synthetic_query_file_id(user_id);
    rag.index_file(IndexRequest {
        user_id: user_id.to_string(),
        file_id: temp_id.clone(),
        content: text.as_bytes().to_vec(),
        content_type: "text/plain",
        metadata: StorageMetadata {
            user_id: user_id.to_string(),
            filename: temp_id.clone(),
            updated_at: None,
            source: Some("obsidian-git-sync-query".to_string()),
        },
    })
    .await?;

    let embedding = db.lookup_embedding(&temp_id).await?;

    if let Err(e) = rag.delete_file(user_id, &temp_id).await {
        tracing::warn!(error = %e, "failed to clean up temporary query embedding");
    }

    embedding.ok_or(VectorQueryError::NoEmbedding)
}

/// Strip a leading `obsidian_vault/` prefix, used both here and by the
/// Worker's indexing path — kept in sync with [`obsidian_fs::VAULT_DIR_NAME`].
fn strip_vault_prefix(path: &str) -> Option<&str> {
    path.strip_prefix(&format!("{}/", obsidian_fs::VAULT_DIR_NAME))
}

/// Run `search_files` end to end: overfetch 3x, filter out excluded/foreign
/// paths, keep the first `k` (already best-first from the DB), attach a
/// 200-character excerpt.
pub async fn search_files(
    db: &dyn VectorSearch,
    vault_root: &Path,
    user_id: &str,
    embedding: &[f32],
    k: usize,
) -> Result<Vec<SearchHit>, VectorQueryError> {
    let raw = db
        .search_raw(user_id, embedding, k * OVERFETCH_FACTOR)
        .await?;

    let mut hits = Vec::with_capacity(k);
    for row in raw {
        let Some(relative) = resolve_relative_path(vault_root, &row).await else {
            continue;
        };
        if obsidian_fs::exclude(vault_root, &vault_root.join(&relative)) {
            continue;
        }
        hits.push(SearchHit {
            filename: relative,
            excerpt: excerpt(&row.document),
            similarity: row.similarity,
        });
        if hits.len() == k {
            break;
        }
    }
    Ok(hits)
}

/// Determine the vault-relative path for a hit: prefer `filename` (stripping
/// the `obsidian_vault/` prefix), fall back to `custom_id`, and for legacy
/// records carrying neither prefix, accept only if the file still exists.
async fn resolve_relative_path(vault_root: &Path, row: &RawHit) -> Option<String> {
    if let Some(filename) = &row.filename {
        if let Some(stripped) = strip_vault_prefix(filename) {
            return Some(stripped.to_string());
        }
        // Legacy record without the vault prefix: accept only if the file
        // exists in the vault and is not excluded.
        let candidate = vault_root.join(filename);
        if tokio::fs::metadata(&candidate).await.is_ok() {
            return Some(filename.clone());
        }
        return None;
    }

    // No filename at all: fall back to custom_id, which embeds the same
    // `user_⟨id⟩_obsidian_vault/⟨path⟩` shape as file_id.
    let marker = format!("_{}/", obsidian_fs::VAULT_DIR_NAME);
    row.custom_id
        .find(&marker)
        .map(|idx| row.custom_id[idx + marker.len()..].to_string())
}

fn excerpt(document: &str) -> String {
    if document.chars().count() <= EXCERPT_LEN {
        document.to_string()
    } else {
        document.chars().take(EXCERPT_LEN).collect()
    }
}

/// Compute the canonical `file_id` for a vault-relative path. Re-exported so
/// the Gateway and the Worker can't drift from [`rag_client::file_id`].
pub fn canonical_file_id(user_id: &str, vault_rel_path: &str) -> String {
    file_id(user_id, vault_rel_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeDb {
        rows: Vec<RawHit>,
    }

    #[async_trait]
    impl VectorSearch for FakeDb {
        async fn search_raw(
            &self,
            _user_id: &str,
            _embedding: &[f32],
            limit: usize,
        ) -> Result<Vec<RawHit>, VectorQueryError> {
            Ok(self.rows.iter().take(limit).cloned().collect())
        }

        async fn lookup_embedding(&self, _custom_id: &str) -> Result<Option<Vec<f32>>, VectorQueryError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn filters_hidden_and_foreign_paths() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("obsidian_vault");
        tokio::fs::create_dir_all(vault.join("notes")).await.unwrap();
        tokio::fs::write(vault.join("notes/a.md"), "hello world").await.unwrap();
        tokio::fs::create_dir_all(vault.join(".git")).await.unwrap();
        tokio::fs::write(vault.join(".git/config"), "x").await.unwrap();
        // root_file.md is deliberately NOT written to disk: a legacy record
        // without the vault prefix is only accepted if the file still exists.

        let db = FakeDb {
            rows: vec![
                RawHit {
                    custom_id: "user_alice_obsidian_vault/notes/a.md".into(),
                    document: "hello world".into(),
                    similarity: 0.9,
                    filename: Some("obsidian_vault/notes/a.md".into()),
                },
                RawHit {
                    custom_id: "user_alice_obsidian_vault/.git/config".into(),
                    document: "hidden".into(),
                    similarity: 0.8,
                    filename: Some("obsidian_vault/.git/config".into()),
                },
                RawHit {
                    custom_id: "user_alice_root_file.md".into(),
                    document: "legacy".into(),
                    similarity: 0.7,
                    filename: Some("root_file.md".into()),
                },
            ],
        };

        let hits = search_files(&db, &vault, "alice", &[0.1, 0.2], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "notes/a.md");
    }

    #[test]
    fn excerpt_truncates_to_200_chars() {
        let long = "a".repeat(300);
        assert_eq!(excerpt(&long).chars().count(), 200);
        assert_eq!(excerpt("short"), "short");
    }

    #[test]
    fn pgvector_literal_format() {
        assert_eq!(to_pgvector_literal(&[0.1, 0.2, 0.3]), "[0.1,0.2,0.3]");
    }
}
