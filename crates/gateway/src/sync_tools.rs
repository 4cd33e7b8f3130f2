//! SyncTools — the MCP tool surface over a user's sync configuration (§4.10).

use rmcp::model::{CallToolResult, Content, ErrorData};

use vault_data::sync_config::is_placeholder;

use crate::state::AppState;

fn ok(text: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(text.into())]))
}

fn err(text: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(format!(
        "Error: {}",
        text.into()
    ))]))
}

pub async fn configure(
    state: &AppState,
    user_id: &str,
    repo_url: Option<&str>,
    token: Option<&str>,
    branch: &str,
) -> Result<CallToolResult, ErrorData> {
    let (Some(repo_url), Some(token)) = (repo_url, token) else {
        return status(state, user_id).await;
    };

    if is_placeholder(repo_url) || is_placeholder(token) || is_placeholder(branch) {
        return err("repo_url, token, and branch must not contain unresolved placeholders");
    }

    let config = match state.sync_configs.configure(user_id, repo_url, branch).await {
        Ok(c) => c,
        Err(e) => return err(format!("{e}")),
    };

    if let Err(e) = state.git_creds.install(user_id, &config.repo_url, token).await {
        return err(format!("failed to store credentials: {e}"));
    }

    ok(format!(
        "Configured sync for '{}' on branch '{}'",
        config.display_repo_url(),
        config.branch
    ))
}

/// Walk the vault counting non-hidden `.md` files (`total`), and how many of
/// those also have a current entry in `sync_hashes.json` (`synced`).
async fn count_progress(
    state: &AppState,
    user_id: &str,
    vault_root: &std::path::Path,
) -> (usize, usize) {
    let hashes = state.hash_index.load(user_id).await;
    let mut total = 0usize;
    let mut synced = 0usize;
    let mut stack = vec![vault_root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if obsidian_fs::exclude(vault_root, &path) {
                continue;
            }
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            total += 1;
            if hashes.contains_key(&path.to_string_lossy().into_owned()) {
                synced += 1;
            }
        }
    }
    (total, synced)
}

pub async fn status(state: &AppState, user_id: &str) -> Result<CallToolResult, ErrorData> {
    let Some(config) = state.sync_configs.load(user_id).await else {
        return ok("Sync is not configured for this vault. Use configure() with a repo_url and token to get started.");
    };

    if config.has_placeholder() {
        return err("Sync configuration contains an unresolved placeholder value (repo_url or branch). Re-run configure() with concrete values.");
    }

    let vault_root = state.config.vault_root(user_id);
    let (total, synced) = count_progress(state, user_id, &vault_root).await;
    let percentage = if total == 0 { 100.0 } else { (synced as f64 / total as f64) * 100.0 };
    let remaining = total.saturating_sub(synced);
    let cycles_remaining = remaining.div_ceil(state.config.max_files_per_cycle.max(1));
    let eta_secs = cycles_remaining as u64 * state.config.sync_interval_secs;

    let state_label = if config.stopped {
        "stopped"
    } else if config.failure_count > 0 {
        "warning"
    } else {
        "active"
    };

    let mut lines = vec![
        format!("Repository: {}", config.display_repo_url()),
        format!("Branch: {}", config.branch),
        format!(
            "Configured via: {}",
            if config.auto_configured { "request headers (auto-configured)" } else { "manual configure()" }
        ),
        format!("Progress: {synced}/{total} files synced ({percentage:.1}%)"),
        format!("ETA: ~{eta_secs}s"),
        format!("State: {state_label}"),
    ];
    if let Some(ts) = config.last_success {
        lines.push(format!("Last successful sync: {}", ts.to_rfc3339()));
    }
    if let Some(err_msg) = &config.last_failure_error {
        lines.push(format!("Last error: {err_msg}"));
    }

    ok(lines.join("\n"))
}

pub async fn reset_failures(state: &AppState, user_id: &str) -> Result<CallToolResult, ErrorData> {
    match state.sync_configs.reset_failures(user_id).await {
        Ok(Some(_)) => ok("Sync failure state has been reset."),
        Ok(None) => err("Sync is not configured for this vault."),
        Err(e) => err(format!("failed to reset failure state: {e}")),
    }
}

pub async fn force_reindex(state: &AppState, user_id: &str) -> Result<CallToolResult, ErrorData> {
    match state.hash_index.force_reindex(user_id).await {
        Ok(()) => ok("Reindex requested. The next sync cycle will re-upload every file in the vault."),
        Err(e) => err(format!("failed to clear hash index: {e}")),
    }
}
