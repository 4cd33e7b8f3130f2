//! Binds opaque bearer tokens and short-lived authorization codes to user ids.
//!
//! Single-replica, process-local, guarded by one `RwLock` per map — the same
//! "map with internal mutex, single-writer-suffices" discipline the host
//! codebase uses for its client/token registries, simplified here because
//! identity is embedded directly in the OAuth `state` parameter and there is
//! no dynamic client registry to join against.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use rand::RngCore;
use tokio::sync::RwLock;

const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60 * 24 * 30);
const AUTH_CODE_LIFETIME: Duration = Duration::from_secs(60 * 10);

struct AccessTokenRecord {
    user_id: String,
    expires_at: SystemTime,
}

struct AuthCodeRecord {
    user_id: String,
    expires_at: SystemTime,
    code_challenge: Option<String>,
}

#[derive(Default)]
pub struct UserStore {
    tokens: RwLock<HashMap<String, AccessTokenRecord>>,
    codes: RwLock<HashMap<String, AuthCodeRecord>>,
}

/// A newly-issued authorization code, ready to be redirected back to the caller.
pub struct IssuedCode {
    pub code: String,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a 32-byte random, base64url-encoded opaque string.
    fn random_token(len: usize) -> String {
        let mut bytes = vec![0u8; len];
        rand::rng().fill_bytes(&mut bytes);
        base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
    }

    /// `POST /authorize` approval: mint a single-use code bound to `user_id`.
    pub async fn issue_auth_code(
        &self,
        user_id: &str,
        code_challenge: Option<String>,
    ) -> IssuedCode {
        let code = Self::random_token(16);
        let record = AuthCodeRecord {
            user_id: user_id.to_string(),
            expires_at: SystemTime::now() + AUTH_CODE_LIFETIME,
            code_challenge,
        };
        self.codes.write().await.insert(code.clone(), record);
        IssuedCode { code }
    }

    /// `POST /token`: consume the code (single-use) and mint an access token.
    ///
    /// Returns `None` for unknown, expired, or already-consumed codes — callers
    /// surface this as `invalid_grant`.
    pub async fn redeem_auth_code(&self, code: &str) -> Option<(String, Option<String>)> {
        let record = {
            let mut codes = self.codes.write().await;
            codes.remove(code)?
        };
        if record.expires_at < SystemTime::now() {
            return None;
        }
        let token = Self::random_token(32);
        self.tokens.write().await.insert(
            token.clone(),
            AccessTokenRecord {
                user_id: record.user_id,
                expires_at: SystemTime::now() + ACCESS_TOKEN_LIFETIME,
            },
        );
        Some((token, record.code_challenge))
    }

    /// Resolve a bearer token to the user id it was issued for, if still valid.
    pub async fn lookup(&self, access_token: &str) -> Option<String> {
        let tokens = self.tokens.read().await;
        let record = tokens.get(access_token)?;
        if record.expires_at < SystemTime::now() {
            return None;
        }
        Some(record.user_id.clone())
    }

    /// Drop every expired token and code. Intended to be called periodically
    /// by whichever process owns the store; not required for correctness
    /// since lookups already check expiry, but keeps the maps from growing
    /// without bound over a long process lifetime.
    pub async fn sweep_expired(&self) {
        let now = SystemTime::now();
        self.tokens.write().await.retain(|_, r| r.expires_at >= now);
        self.codes.write().await.retain(|_, r| r.expires_at >= now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn code_redeems_to_token_bound_to_same_user() {
        let store = UserStore::new();
        let issued = store.issue_auth_code("alice", None).await;
        let (token, _challenge) = store.redeem_auth_code(&issued.code).await.unwrap();
        assert_eq!(store.lookup(&token).await, Some("alice".to_string()));
    }

    #[tokio::test]
    async fn code_is_single_use() {
        let store = UserStore::new();
        let issued = store.issue_auth_code("alice", None).await;
        assert!(store.redeem_auth_code(&issued.code).await.is_some());
        assert!(store.redeem_auth_code(&issued.code).await.is_none());
    }

    #[tokio::test]
    async fn unknown_token_resolves_to_none() {
        let store = UserStore::new();
        assert_eq!(store.lookup("nope").await, None);
    }

    #[tokio::test]
    async fn carries_pkce_challenge_through_redemption() {
        let store = UserStore::new();
        let issued = store
            .issue_auth_code("alice", Some("challenge".to_string()))
            .await;
        let (_, challenge) = store.redeem_auth_code(&issued.code).await.unwrap();
        assert_eq!(challenge, Some("challenge".to_string()));
    }
}
