//! Wire contract to the external RAG (embed + vector-store) service (§4.4).
//!
//! The service is treated as opaque: we only depend on its three endpoints
//! (`POST /embed`, `DELETE /embed/{file_id}`, `POST /local/embed`). The
//! contract is expressed as the [`RagClient`] trait so the Gateway and the
//! Worker can depend on an abstraction, and tests can substitute an
//! in-memory fake instead of a real HTTP server.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const JWT_LIFETIME_SECS: i64 = 5 * 60;
const INDEX_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("rag service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to sign RAG service JWT: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl RagError {
    /// Transient: connection-level failure or a 5xx — worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            RagError::Request(e) => e.is_timeout() || e.is_connect(),
            RagError::Status { status, .. } => status.is_server_error(),
            RagError::Jwt(_) => false,
        }
    }

    /// A 404 on delete is not an error worth surfacing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RagError::Status { status, .. } if status.as_u16() == 404)
    }
}

/// Metadata attached to an indexed chunk; `custom_id` in the vector DB is
/// derived from `file_id`, `filename` and `user_id` always appear in `cmetadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetadata {
    pub user_id: String,
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// One file to index. `file_id` must be computed identically by every
/// caller — see [`file_id`].
pub struct IndexRequest {
    pub user_id: String,
    pub file_id: String,
    pub content: Vec<u8>,
    pub content_type: &'static str,
    pub metadata: StorageMetadata,
}

/// Canonical `file_id` format, shared by the Gateway and the Worker:
/// `user_⟨user_id⟩_obsidian_vault/⟨vault_rel_path⟩`.
pub fn file_id(user_id: &str, vault_rel_path: &str) -> String {
    format!("user_{user_id}_obsidian_vault/{vault_rel_path}")
}

#[async_trait]
pub trait RagClient: Send + Sync {
    /// `POST /embed`, retried up to 3x with exponential backoff on
    /// connection errors or 5xx; 4xx other than 404 is fatal immediately.
    async fn index_file(&self, request: IndexRequest) -> Result<(), RagError>;

    /// `DELETE /embed/{file_id}`. 404 is treated as success by callers.
    async fn delete_file(&self, user_id: &str, file_id: &str) -> Result<(), RagError>;

    /// `POST /local/embed`, the fast path. `Ok(None)` means the endpoint is
    /// absent or returned non-2xx; callers fall back to the DB round-trip.
    async fn fast_embed(&self, user_id: &str, text: &str) -> Result<Option<Vec<f32>>, RagError>;
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    id: &'a str,
    exp: i64,
}

/// Production [`RagClient`] backed by `reqwest`.
pub struct ReqwestRagClient {
    http: reqwest::Client,
    base_url: String,
    jwt_secret: String,
}

impl ReqwestRagClient {
    pub fn new(base_url: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client builds with static TLS config");
        Self {
            http,
            base_url: base_url.into(),
            jwt_secret: jwt_secret.into(),
        }
    }

    fn bearer(&self, user_id: &str) -> Result<String, RagError> {
        let claims = JwtClaims {
            id: user_id,
            exp: (Utc::now() + chrono::Duration::seconds(JWT_LIFETIME_SECS)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?;
        Ok(token)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RagError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RagError::Status { status, body })
        }
    }
}

#[async_trait]
impl RagClient for ReqwestRagClient {
    async fn index_file(&self, request: IndexRequest) -> Result<(), RagError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let bearer = self.bearer(&request.user_id)?;
            let metadata_json = serde_json::to_string(&request.metadata)
                .expect("StorageMetadata always serializes");
            let part = reqwest::multipart::Part::bytes(request.content.clone())
                .file_name(request.metadata.filename.clone())
                .mime_str(request.content_type)
                .expect("content_type is a static, valid mime string");
            let form = reqwest::multipart::Form::new()
                .text("file_id", request.file_id.clone())
                .text("storage_metadata", metadata_json)
                .part("file", part);

            let result = self
                .http
                .post(format!("{}/embed", self.base_url))
                .bearer_auth(bearer)
                .multipart(form)
                .send()
                .await
                .map_err(RagError::from);

            let result = match result {
                Ok(response) => Self::check_status(response).await.map(|_| ()),
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < INDEX_RETRY_ATTEMPTS => {
                    let delay = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(error = %e, attempt, "transient RAG index failure, retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn delete_file(&self, user_id: &str, file_id: &str) -> Result<(), RagError> {
        let bearer = self.bearer(user_id)?;
        let encoded = urlencoding::encode(file_id);
        let response = self
            .http
            .delete(format!("{}/embed/{}", self.base_url, encoded))
            .bearer_auth(bearer)
            .send()
            .await?;
        if response.status().as_u16() == 404 {
            return Ok(());
        }
        Self::check_status(response).await.map(|_| ())
    }

    async fn fast_embed(&self, user_id: &str, text: &str) -> Result<Option<Vec<f32>>, RagError> {
        #[derive(Serialize)]
        struct Req<'a> {
            text: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            embedding: Vec<f32>,
        }

        let bearer = self.bearer(user_id)?;
        let result = self
            .http
            .post(format!("{}/local/embed", self.base_url))
            .bearer_auth(bearer)
            .json(&Req { text })
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(_) => return Ok(None),
        };
        if !response.status().is_success() {
            return Ok(None);
        }
        match response.json::<Resp>().await {
            Ok(body) => Ok(Some(body.embedding)),
            Err(_) => Ok(None),
        }
    }
}

/// A synthetic, collision-resistant `file_id` for the temporary document used
/// by the query-embedding DB-fallback path (see `vector-query`).
pub fn synthetic_query_file_id(user_id: &str) -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    format!("user_{user_id}_query_{}", hex_encode(&bytes))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_matches_canonical_format() {
        assert_eq!(
            file_id("alice", "notes/a.md"),
            "user_alice_obsidian_vault/notes/a.md"
        );
    }

    #[test]
    fn synthetic_query_ids_are_unique() {
        let a = synthetic_query_file_id("alice");
        let b = synthetic_query_file_id("alice");
        assert_ne!(a, b);
        assert!(a.starts_with("user_alice_query_"));
    }

    #[test]
    fn transient_classification() {
        let err = RagError::Status {
            status: reqwest::StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(err.is_transient());
        let err = RagError::Status {
            status: reqwest::StatusCode::BAD_REQUEST,
            body: String::new(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn not_found_classification() {
        let err = RagError::Status {
            status: reqwest::StatusCode::NOT_FOUND,
            body: String::new(),
        };
        assert!(err.is_not_found());
    }
}
