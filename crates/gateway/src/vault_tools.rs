//! VaultTools — the MCP tool surface over a user's vault (§4.9).
//!
//! Tool bodies return human-readable strings wrapped in
//! `CallToolResult::success` even on failure (`"Error: …"`), following the
//! spec's "tools are expected to return human-readable strings" contract;
//! `ErrorData` is reserved for genuine protocol-level failures (serialization,
//! missing context), mirroring the `read_note`/`write_note` idiom this module
//! is grounded on.

use rmcp::model::{CallToolResult, Content, ErrorData};

use git_sync::FileAction;
use obsidian_fs::PathError;
use rag_client::{IndexRequest, StorageMetadata};

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

/// Vault-relative path (forward slashes) for an absolute path under `vault_root`.
fn relative_path(vault_root: &std::path::Path, absolute: &std::path::Path) -> String {
    absolute
        .strip_prefix(vault_root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default()
}

fn path_error_message(name: &str, e: PathError) -> String {
    match e {
        PathError::PathTraversal => format!("path traversal: '{name}' resolves outside the vault"),
        PathError::NotFound => format!("File '{name}' not found"),
        PathError::Io(io) => format!("io error resolving '{name}': {io}"),
    }
}

/// Index (or reindex) one file's content via the RAG service and record its
/// hash, mirroring `git_sync`'s single-file index step but driven by a
/// Gateway write rather than the Worker's reconcile loop.
async fn index_and_hash(
    state: &AppState,
    user_id: &str,
    relative_path: &str,
    absolute_path: &std::path::Path,
    content: &[u8],
) -> Result<(), rag_client::RagError> {
    let vault_filename = format!("{}/{}", obsidian_fs::VAULT_DIR_NAME, relative_path);
    let file_id = rag_client::file_id(user_id, relative_path);

    if let Err(e) = state.rag.delete_file(user_id, &file_id).await {
        if !e.is_not_found() {
            tracing::warn!(user_id, relative_path, error = %e, "pre-index delete failed, continuing");
        }
    }

    state
        .rag
        .index_file(IndexRequest {
            user_id: user_id.to_string(),
            file_id,
            content: content.to_vec(),
            content_type: "text/markdown",
            metadata: StorageMetadata {
                user_id: user_id.to_string(),
                filename: vault_filename,
                updated_at: Some(chrono::Utc::now()),
                source: Some("obsidian-git-sync".to_string()),
            },
        })
        .await?;

    state
        .hash_index
        .record(user_id, absolute_path, content)
        .await
        .ok();
    Ok(())
}

/// Best-effort per-file commit/push: logged and swallowed on failure, and
/// skipped entirely when sync isn't configured or the circuit breaker is open.
async fn commit_push_best_effort(
    state: &AppState,
    user_id: &str,
    relative_path: &str,
    action: FileAction,
) {
    let Some(config) = state.sync_configs.load(user_id).await else {
        return;
    };
    if config.stopped {
        return;
    }
    let vault_root = state.config.vault_root(user_id);
    match state
        .git_sync
        .commit_and_push_file(&vault_root, &config.branch, relative_path, action)
        .await
    {
        Ok(_) => {}
        Err(e) => tracing::warn!(user_id, relative_path, error = %e, "per-file commit/push failed"),
    }
}

pub async fn upload_file(
    state: &AppState,
    user_id: &str,
    filename: &str,
    content: &str,
) -> Result<CallToolResult, ErrorData> {
    let _guard = state.locks.lock(user_id).await;
    let vault_root = obsidian_fs::ensure_vault_root(&state.config.storage_root, user_id)
        .await
        .map_err(|e| ErrorData::internal_error(format!("failed to prepare vault: {e}"), None))?;

    let absolute = match obsidian_fs::resolve(&vault_root, filename).await {
        Ok(p) => p,
        Err(e) => return err(path_error_message(filename, e)),
    };

    if tokio::fs::metadata(&absolute).await.is_ok() {
        return err(format!("File '{filename}' already exists"));
    }

    if let Some(parent) = absolute.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return err(format!("failed to create parent directory: {e}"));
        }
    }
    if let Err(e) = tokio::fs::write(&absolute, content).await {
        return err(format!("failed to write '{filename}': {e}"));
    }

    let relative = relative_path(&vault_root, &absolute);
    if let Err(e) = index_and_hash(state, user_id, &relative, &absolute, content.as_bytes()).await {
        // Roll back the write on indexing failure, per §4.9.
        let _ = tokio::fs::remove_file(&absolute).await;
        return err(format!("failed to index '{filename}': {e}"));
    }

    commit_push_best_effort(state, user_id, &relative, FileAction::Added).await;

    ok(format!(
        "Uploaded '{filename}' ({} bytes)",
        content.len()
    ))
}

fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_' || *c == '-')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

pub async fn create_note(
    state: &AppState,
    user_id: &str,
    title: &str,
    content: &str,
) -> Result<CallToolResult, ErrorData> {
    let safe = sanitize_title(title);
    let filename = format!("{safe}.md");
    let body = format!("# {title}\n\n{content}");
    upload_file(state, user_id, &filename, &body).await
}

pub async fn read_file(
    state: &AppState,
    user_id: &str,
    filename: &str,
) -> Result<CallToolResult, ErrorData> {
    let _guard = state.locks.lock(user_id).await;
    let vault_root = obsidian_fs::ensure_vault_root(&state.config.storage_root, user_id)
        .await
        .map_err(|e| ErrorData::internal_error(format!("failed to prepare vault: {e}"), None))?;

    let absolute = match obsidian_fs::resolve(&vault_root, filename).await {
        Ok(p) => p,
        Err(e) => return err(path_error_message(filename, e)),
    };

    match tokio::fs::read_to_string(&absolute).await {
        Ok(content) => ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            err(format!("File '{filename}' not found"))
        }
        Err(e) => err(format!("failed to read '{filename}': {e}")),
    }
}

pub async fn modify_file(
    state: &AppState,
    user_id: &str,
    filename: &str,
    content: &str,
) -> Result<CallToolResult, ErrorData> {
    let _guard = state.locks.lock(user_id).await;
    let vault_root = obsidian_fs::ensure_vault_root(&state.config.storage_root, user_id)
        .await
        .map_err(|e| ErrorData::internal_error(format!("failed to prepare vault: {e}"), None))?;

    let absolute = match obsidian_fs::resolve(&vault_root, filename).await {
        Ok(p) => p,
        Err(e) => return err(path_error_message(filename, e)),
    };

    if tokio::fs::metadata(&absolute).await.is_err() {
        return err(format!("File '{filename}' not found"));
    }

    if let Err(e) = tokio::fs::write(&absolute, content).await {
        return err(format!("failed to write '{filename}': {e}"));
    }

    let relative = relative_path(&vault_root, &absolute);
    if let Err(e) = index_and_hash(state, user_id, &relative, &absolute, content.as_bytes()).await {
        return err(format!("failed to reindex '{filename}': {e}"));
    }

    commit_push_best_effort(state, user_id, &relative, FileAction::Modified).await;

    ok(format!("Updated '{filename}' ({} bytes)", content.len()))
}

pub async fn delete_file(
    state: &AppState,
    user_id: &str,
    filename: &str,
) -> Result<CallToolResult, ErrorData> {
    let _guard = state.locks.lock(user_id).await;
    let vault_root = obsidian_fs::ensure_vault_root(&state.config.storage_root, user_id)
        .await
        .map_err(|e| ErrorData::internal_error(format!("failed to prepare vault: {e}"), None))?;

    let absolute = match obsidian_fs::resolve(&vault_root, filename).await {
        Ok(p) => p,
        Err(e) => return err(path_error_message(filename, e)),
    };

    if tokio::fs::metadata(&absolute).await.is_err() {
        return err(format!("File '{filename}' not found"));
    }

    let relative = relative_path(&vault_root, &absolute);
    let file_id = rag_client::file_id(user_id, &relative);
    if let Err(e) = state.rag.delete_file(user_id, &file_id).await {
        if !e.is_not_found() {
            tracing::warn!(user_id, filename, error = %e, "rag delete failed, continuing with local delete");
        }
    }

    if let Err(e) = tokio::fs::remove_file(&absolute).await {
        return err(format!("failed to delete '{filename}': {e}"));
    }

    commit_push_best_effort(state, user_id, &relative, FileAction::Deleted).await;

    ok(format!("Deleted '{filename}'"))
}

pub async fn list_files(
    state: &AppState,
    user_id: &str,
    directory: &str,
) -> Result<CallToolResult, ErrorData> {
    let _guard = state.locks.lock(user_id).await;
    let vault_root = obsidian_fs::ensure_vault_root(&state.config.storage_root, user_id)
        .await
        .map_err(|e| ErrorData::internal_error(format!("failed to prepare vault: {e}"), None))?;

    let target = if directory.is_empty() {
        vault_root.clone()
    } else {
        match obsidian_fs::resolve(&vault_root, directory).await {
            Ok(p) => p,
            Err(e) => return err(path_error_message(directory, e)),
        }
    };

    let listing = match obsidian_fs::list_dir(&vault_root, &target).await {
        Ok(l) => l,
        Err(PathError::NotFound) => return err(format!("Directory '{directory}' not found")),
        Err(e) => return err(format!("failed to list '{directory}': {e}")),
    };

    if listing.files.is_empty() && listing.dirs.is_empty() {
        return ok("No items found.");
    }

    let mut lines = Vec::new();
    for dir in &listing.dirs {
        lines.push(format!(
            "{}/  ({} files, {} subdirectories)",
            dir.name, dir.file_count, dir.dir_count
        ));
    }
    for file in &listing.files {
        lines.push(format!(
            "{}  ({} bytes, modified {})",
            file.name,
            file.size_bytes,
            file.modified.to_rfc3339()
        ));
    }
    lines.push(String::new());
    lines.push("Tip: use search_files to find notes by meaning rather than browsing.".to_string());

    ok(lines.join("\n"))
}

pub async fn search_files(
    state: &AppState,
    user_id: &str,
    query: &str,
    k: usize,
) -> Result<CallToolResult, ErrorData> {
    let _guard = state.locks.lock(user_id).await;
    let vault_root = obsidian_fs::ensure_vault_root(&state.config.storage_root, user_id)
        .await
        .map_err(|e| ErrorData::internal_error(format!("failed to prepare vault: {e}"), None))?;

    let embedding =
        match vector_query::embed_query(state.rag.as_ref(), state.vector_db.as_ref(), user_id, query).await {
            Ok(e) => e,
            Err(e) => return err(format!("failed to embed query: {e}")),
        };

    let hits = match vector_query::search_files(state.vector_db.as_ref(), &vault_root, user_id, &embedding, k)
        .await
    {
        Ok(h) => h,
        Err(e) => return err(format!("search failed: {e}")),
    };

    if hits.is_empty() {
        return ok("No items found.");
    }

    let mut lines = Vec::with_capacity(hits.len());
    for hit in hits {
        lines.push(format!(
            "{} (relevance: {:.3})\n{}",
            hit.filename, hit.similarity, hit.excerpt
        ));
    }
    ok(lines.join("\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_titles() {
        assert_eq!(sanitize_title("My Great Idea!"), "My_Great_Idea");
        assert_eq!(sanitize_title("  spaces   collapse  "), "spaces_collapse");
        assert_eq!(sanitize_title("weird/chars*here"), "weirdcharshere");
    }
}
