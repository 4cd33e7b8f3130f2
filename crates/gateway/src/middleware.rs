//! Bearer-token auth and header-driven auto-configuration for `/mcp`
//! requests (§4.2, §4.6). Runs as an axum middleware wrapping the MCP
//! service, the one place `context::scope` is entered.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use vault_data::sync_config::is_placeholder;

use crate::context;
use crate::state::AppState;

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [("WWW-Authenticate", "Bearer")],
        "missing or invalid access token",
    )
        .into_response()
}

/// Auto-configure a user's repo from request headers, if present and valid.
/// Failures here are logged and swallowed: header-driven configuration is a
/// convenience, not a prerequisite for the request to proceed.
async fn maybe_auto_configure(state: &AppState, user_id: &str, headers: &HeaderMap) {
    let Some(repo_url) = header_str(headers, "x-obsidian-repo-url") else {
        return;
    };
    if is_placeholder(repo_url) {
        return;
    }

    let branch = header_str(headers, "x-obsidian-branch")
        .filter(|b| !is_placeholder(b))
        .unwrap_or("main");

    match state.sync_configs.auto_configure(user_id, repo_url, branch).await {
        Ok(Some(_)) => {
            tracing::info!(user_id, repo_url, branch, "auto-configured sync from request headers");
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(user_id, %err, "auto-configure from headers failed");
            return;
        }
    }

    if let Some(token) = header_str(headers, "x-obsidian-token").filter(|t| !is_placeholder(t)) {
        if let Err(err) = state.git_creds.install(user_id, repo_url, token).await {
            tracing::warn!(user_id, %err, "failed to install auto-configured git credential");
        }
    }
}

pub async fn auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let headers = request.headers().clone();

    let Some(token) = header_str(&headers, "authorization").and_then(|v| v.strip_prefix("Bearer ")) else {
        return unauthorized();
    };

    let Some(user_id) = state.users.lookup(token).await else {
        return unauthorized();
    };

    maybe_auto_configure(&state, &user_id, &headers).await;

    context::scope(user_id, next.run(request)).await
}
