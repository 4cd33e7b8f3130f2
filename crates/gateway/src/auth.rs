//! OAuth 2.0 authorization-code flow (§4.2): `GET|POST /authorize`, `POST /token`.
//!
//! Grounded on the host codebase's own OAuth reference (`authorize.rs`/
//! `token.rs`): axum `Query`/`Form` extractors, `Redirect`/`Json` responses,
//! and the same SHA-256 + base64url PKCE verification. Simplified relative
//! to that reference because there is no dynamic client registry here —
//! identity rides entirely in the `state` parameter, as the Design Notes
//! call for.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub redirect_uri: String,
    pub state: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub code_challenge: Option<String>,
    #[serde(default)]
    pub code_challenge_method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeForm {
    pub action: String,
    pub redirect_uri: String,
    pub state: String,
    #[serde(default)]
    pub code_challenge: Option<String>,
}

/// Extract `user_id` from a `⟨user_id⟩:⟨anything⟩` state parameter.
fn user_id_from_state(state: &str) -> Option<&str> {
    state.split_once(':').map(|(user_id, _)| user_id)
}

pub async fn authorize_get(Query(params): Query<AuthorizeQuery>) -> Response {
    if user_id_from_state(&params.state).is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Html("Malformed state parameter: expected ⟨user_id⟩:⟨anything⟩".to_string()),
        )
            .into_response();
    }

    let challenge_field = params
        .code_challenge
        .as_deref()
        .map(|c| format!(r#"<input type="hidden" name="code_challenge" value="{c}">"#))
        .unwrap_or_default();

    let html = format!(
        r#"<!doctype html>
<html>
<body>
<h1>Connect your Obsidian vault</h1>
<p>Approve access for this chat assistant to read and write your vault?</p>
<form method="post" action="/authorize">
<input type="hidden" name="redirect_uri" value="{redirect_uri}">
<input type="hidden" name="state" value="{state}">
{challenge_field}
<button type="submit" name="action" value="approve">Approve</button>
</form>
</body>
</html>"#,
        redirect_uri = params.redirect_uri,
        state = params.state,
    );

    Html(html).into_response()
}

pub async fn authorize_post(
    State(state): State<AppState>,
    axum::Form(form): axum::Form<AuthorizeForm>,
) -> Response {
    if form.action != "approve" {
        return (StatusCode::BAD_REQUEST, Html("Request was not approved".to_string()))
            .into_response();
    }

    let Some(user_id) = user_id_from_state(&form.state) else {
        return (
            StatusCode::BAD_REQUEST,
            Html("Malformed state parameter: expected ⟨user_id⟩:⟨anything⟩".to_string()),
        )
            .into_response();
    };

    let issued = state.users.issue_auth_code(user_id, form.code_challenge).await;

    let redirect_url = format!(
        "{}?code={}&state={}",
        form.redirect_uri,
        urlencoding::encode(&issued.code),
        urlencoding::encode(&form.state),
    );
    Redirect::to(&redirect_url).into_response()
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    grant_type: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    code_verifier: Option<String>,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: String,
    expires_in: u64,
    scope: String,
}

#[derive(Debug, Serialize)]
struct TokenError {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<String>,
}

fn token_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(TokenError {
            error: error.to_string(),
            error_description: Some(description.to_string()),
        }),
    )
        .into_response()
}

/// `POST /token`: accepts both form-urlencoded and JSON bodies, per §4.2.
pub async fn token(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let is_json = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    let request: TokenRequest = if is_json {
        match serde_json::from_slice(&body) {
            Ok(r) => r,
            Err(_) => return token_error(StatusCode::BAD_REQUEST, "invalid_request", "malformed JSON body"),
        }
    } else {
        match serde_urlencoded::from_bytes(&body) {
            Ok(r) => r,
            Err(_) => {
                return token_error(StatusCode::BAD_REQUEST, "invalid_request", "malformed form body")
            }
        }
    };

    if request.grant_type != "authorization_code" {
        return token_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "only authorization_code is supported",
        );
    }

    let Some(code) = request.code else {
        return token_error(StatusCode::BAD_REQUEST, "invalid_request", "code is required");
    };

    let Some((access_token, code_challenge)) = state.users.redeem_auth_code(&code).await else {
        return token_error(
            StatusCode::BAD_REQUEST,
            "invalid_grant",
            "authorization code is invalid, expired, or already used",
        );
    };

    if let Some(challenge) = code_challenge {
        let Some(verifier) = request.code_verifier else {
            return token_error(StatusCode::BAD_REQUEST, "invalid_grant", "code_verifier is required");
        };
        if !verify_pkce(&challenge, &verifier) {
            return token_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "code_verifier does not match code_challenge",
            );
        }
    }

    (
        StatusCode::OK,
        Json(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: 30 * 24 * 60 * 60, // mirrors UserStore::ACCESS_TOKEN_LIFETIME
            scope: "obsidian_sync".to_string(),
        }),
    )
        .into_response()
}

fn verify_pkce(code_challenge: &str, code_verifier: &str) -> bool {
    let digest = Sha256::digest(code_verifier.as_bytes());
    let computed = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    computed == code_challenge
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_user_id_from_state() {
        assert_eq!(user_id_from_state("alice:xyz"), Some("alice"));
        assert_eq!(user_id_from_state("no-colon-here"), None);
    }

    #[test]
    fn pkce_round_trips() {
        let verifier = "a-valid-code-verifier-string-of-sufficient-length";
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
        assert!(verify_pkce(&challenge, verifier));
        assert!(!verify_pkce(&challenge, "wrong-verifier"));
    }
}
