//! Per-user Git reconciliation (§4.7): pull, detect content changes, index
//! the LIFO-throttled subset of changed files, commit and push local edits.

pub mod runner;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rag_client::{file_id as canonical_file_id, IndexRequest, RagClient, StorageMetadata};
use runner::{Candidate, GitRunner};
use thiserror::Error;
use vault_data::{GitCredStore, HashIndex, SyncConfig};

const PULL_PUSH_RETRY_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum GitSyncError {
    #[error("git clone failed: {0}")]
    CloneFailed(String),
    #[error("git pull failed after retries: {0}")]
    PullFailed(String),
    #[error("git push failed after retries: {0}")]
    PushFailed(String),
    #[error("git command could not be spawned: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("credential store error: {0}")]
    Credentials(#[from] vault_data::GitCredStoreError),
    #[error("hash index error: {0}")]
    HashIndex(#[from] vault_data::HashIndexError),
}

/// Summary of one user's reconcile cycle, for the scheduler's per-cycle log line.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub files_indexed: usize,
    pub files_failed: usize,
    pub pushed: bool,
}

fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << (attempt - 1))
}

/// Per-user Git reconciliation, built from narrow, injectable collaborators
/// so tests can substitute a fake [`GitRunner`] and [`RagClient`].
pub struct GitSync {
    runner: Arc<dyn GitRunner>,
    rag: Arc<dyn RagClient>,
    hash_index: Arc<HashIndex>,
    git_creds: Arc<GitCredStore>,
    max_files_per_cycle: usize,
    index_delay: Duration,
}

impl GitSync {
    pub fn new(
        runner: Arc<dyn GitRunner>,
        rag: Arc<dyn RagClient>,
        hash_index: Arc<HashIndex>,
        git_creds: Arc<GitCredStore>,
        max_files_per_cycle: usize,
        index_delay: Duration,
    ) -> Self {
        Self {
            runner,
            rag,
            hash_index,
            git_creds,
            max_files_per_cycle,
            index_delay,
        }
    }

    /// Run the full per-user reconcile described by §4.7, steps 1-9.
    pub async fn sync(
        &self,
        user_id: &str,
        config: &SyncConfig,
        vault_root: &Path,
        token: Option<&str>,
    ) -> Result<SyncReport, GitSyncError> {
        let clean_url = vault_data::git_cred_store::clean_url(&config.repo_url);

        self.ensure_checkout(user_id, vault_root, &clean_url, &config.branch, token)
            .await?;
        self.cleanup_hidden(user_id, vault_root).await;
        self.pull(vault_root, &config.branch).await?;

        let candidates = self.discover_candidates(vault_root).await;
        let changed = self.filter_changed(user_id, candidates).await;
        let mut ordered = changed;
        ordered.sort_by(|a, b| b.modified.cmp(&a.modified));
        ordered.truncate(self.max_files_per_cycle);

        let mut report = SyncReport::default();
        for (i, candidate) in ordered.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.index_delay).await;
            }
            match self.index_one(user_id, vault_root, candidate).await {
                Ok(()) => report.files_indexed += 1,
                Err(e) => {
                    tracing::warn!(error = %e, file = %candidate.relative_path, "failed to index file");
                    report.files_failed += 1;
                }
            }
        }

        report.pushed = self.push_if_dirty(vault_root, &config.branch).await?;
        Ok(report)
    }

    async fn ensure_checkout(
        &self,
        user_id: &str,
        vault_root: &Path,
        clean_url: &str,
        branch: &str,
        token: Option<&str>,
    ) -> Result<(), GitSyncError> {
        if let Some(token) = token {
            self.git_creds.install(user_id, clean_url, token).await?;
        }
        // vault_root = ⟨root⟩/⟨user⟩/obsidian_vault, so its parent is the user dir
        // where `.git-credentials` lives.
        let creds_path = vault_root
            .parent()
            .unwrap_or(vault_root)
            .join(".git-credentials");

        if tokio::fs::metadata(vault_root.join(".git")).await.is_err() {
            if let Some(parent) = vault_root.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let dest = vault_root.to_string_lossy().into_owned();
            let output = self
                .runner
                .run(
                    vault_root.parent().unwrap_or(vault_root),
                    &["clone", "--branch", branch, clean_url, &dest],
                )
                .await?;
            if !output.status_success {
                return Err(GitSyncError::CloneFailed(output.stderr));
            }
        }

        self.runner
            .run(
                vault_root,
                &[
                    "config",
                    "credential.helper",
                    &format!("store --file={}", creds_path.display()),
                ],
            )
            .await?;
        let _ = self
            .runner
            .run(vault_root, &["remote", "set-url", "origin", clean_url])
            .await?;
        Ok(())
    }

    /// Remove from the vector DB any previously-indexed markdown file that
    /// now lives under a hidden path segment (§4.7 step 2).
    async fn cleanup_hidden(&self, user_id: &str, vault_root: &Path) {
        let mut stack = vec![vault_root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !obsidian_fs::exclude(vault_root, &path) {
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(vault_root) else {
                    continue;
                };
                let relative = relative.to_string_lossy().replace('\\', "/");
                let id = canonical_file_id(user_id, &relative);
                if let Err(e) = self.rag.delete_file(user_id, &id).await {
                    tracing::warn!(error = %e, file = %relative, "failed to clean up hidden-path index entry");
                }
            }
        }
    }

    async fn pull(&self, vault_root: &Path, branch: &str) -> Result<(), GitSyncError> {
        let mut last_err = String::new();
        for attempt in 1..=PULL_PUSH_RETRY_ATTEMPTS {
            let output = self
                .runner
                .run(vault_root, &["pull", "origin", branch])
                .await?;
            if output.status_success {
                return Ok(());
            }
            last_err = output.stderr;
            if attempt < PULL_PUSH_RETRY_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
        Err(GitSyncError::PullFailed(last_err))
    }

    async fn discover_candidates(&self, vault_root: &Path) -> Vec<Candidate> {
        let output = self
            .runner
            .run(vault_root, &["ls-files", "-z", "-c", "-o", "--exclude-standard", "*.md"])
            .await;

        let relative_paths: Vec<String> = match output {
            Ok(o) if o.status_success => o
                .stdout
                .split(|&b| b == 0)
                .filter(|s| !s.is_empty())
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .collect(),
            _ => return self.walk_fallback(vault_root).await,
        };

        let mut candidates = Vec::new();
        for relative in relative_paths {
            let absolute = vault_root.join(&relative);
            if obsidian_fs::exclude(vault_root, &absolute) {
                continue;
            }
            if absolute.parent() == Some(vault_root) {
                // §4.1/§4.7: files at the vault root are excluded from sync candidates.
                continue;
            }
            let Ok(metadata) = tokio::fs::metadata(&absolute).await else {
                continue;
            };
            let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            candidates.push(Candidate {
                absolute_path: absolute,
                relative_path: relative,
                modified,
            });
        }
        candidates
    }

    async fn walk_fallback(&self, vault_root: &Path) -> Vec<Candidate> {
        let mut out = Vec::new();
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
                if path.parent() == Some(vault_root) {
                    // §4.1/§4.7: files at the vault root are excluded from sync candidates.
                    continue;
                }
                let Ok(metadata) = entry.metadata().await else {
                    continue;
                };
                let relative = path
                    .strip_prefix(vault_root)
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                out.push(Candidate {
                    absolute_path: path,
                    relative_path: relative,
                    modified: metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH),
                });
            }
        }
        out
    }

    async fn filter_changed(&self, user_id: &str, candidates: Vec<Candidate>) -> Vec<Candidate> {
        let hashes = self.hash_index.load(user_id).await;
        let mut changed = Vec::new();
        for candidate in candidates {
            let Ok(content) = tokio::fs::read(&candidate.absolute_path).await else {
                continue;
            };
            if HashIndex::has_changed(&hashes, &candidate.absolute_path, &content) {
                changed.push(candidate);
            }
        }
        changed
    }

    async fn index_one(
        &self,
        user_id: &str,
        _vault_root: &Path,
        candidate: &Candidate,
    ) -> Result<(), IndexOneError> {
        let content = tokio::fs::read(&candidate.absolute_path).await?;
        let vault_filename = format!("{}/{}", obsidian_fs::VAULT_DIR_NAME, candidate.relative_path);
        let id = canonical_file_id(user_id, &candidate.relative_path);

        let delete_result = self.rag.delete_file(user_id, &id).await;
        if let Err(e) = delete_result {
            if !e.is_not_found() {
                tracing::warn!(error = %e, file = %candidate.relative_path, "pre-index delete failed, continuing");
            }
        }

        let request = IndexRequest {
            user_id: user_id.to_string(),
            file_id: id.clone(),
            content: content.clone(),
            content_type: "text/markdown",
            metadata: StorageMetadata {
                user_id: user_id.to_string(),
                filename: vault_filename.clone(),
                updated_at: Some(Utc::now()),
                source: Some("obsidian-git-sync".to_string()),
            },
        };
        // `RagClient::index_file` already retries transient failures internally
        // (§7: 3x backoff owned by the client); don't double it here.
        self.rag.index_file(request).await?;
        self.hash_index
            .record(user_id, &candidate.absolute_path, &content)
            .await
            .ok();
        Ok(())
    }

    async fn push_if_dirty(&self, vault_root: &Path, branch: &str) -> Result<bool, GitSyncError> {
        let status = self.runner.run(vault_root, &["status", "--porcelain"]).await?;
        if status.stdout.is_empty() {
            return Ok(false);
        }

        self.runner.run(vault_root, &["add", "-A"]).await?;
        let message = format!("Sync from LibreChat: {}", Utc::now().to_rfc3339());
        self.runner.run(vault_root, &["commit", "-m", &message]).await?;

        let mut last_err = String::new();
        for attempt in 1..=PULL_PUSH_RETRY_ATTEMPTS {
            let output = self.runner.run(vault_root, &["push", "origin", branch]).await?;
            if output.status_success {
                return Ok(true);
            }
            last_err = output.stderr;
            if attempt < PULL_PUSH_RETRY_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
        Err(GitSyncError::PushFailed(last_err))
    }

    /// Commit and push just one file's change, for the Gateway's per-file
    /// writes (§4.9). Best-effort: callers log and swallow the error.
    pub async fn commit_and_push_file(
        &self,
        vault_root: &Path,
        branch: &str,
        relative_path: &str,
        action: FileAction,
    ) -> Result<bool, GitSyncError> {
        self.runner.run(vault_root, &["add", "-A", "--", relative_path]).await?;
        let verb = match action {
            FileAction::Added => "Add",
            FileAction::Modified => "Update",
            FileAction::Deleted => "Delete",
        };
        let message = format!("{verb} {relative_path} via MCP tool");
        let commit = self.runner.run(vault_root, &["commit", "-m", &message]).await?;
        if !commit.status_success {
            // Nothing to commit (e.g. identical content) is not an error.
            return Ok(false);
        }

        let mut last_err = String::new();
        for attempt in 1..=PULL_PUSH_RETRY_ATTEMPTS {
            let output = self.runner.run(vault_root, &["push", "origin", branch]).await?;
            if output.status_success {
                return Ok(true);
            }
            last_err = output.stderr;
            if attempt < PULL_PUSH_RETRY_ATTEMPTS {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
        }
        Err(GitSyncError::PushFailed(last_err))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum FileAction {
    Added,
    Modified,
    Deleted,
}

/// Internal error for a single file's index attempt: either the file
/// couldn't be read, or the RAG service rejected it after retries.
#[derive(Debug, Error)]
enum IndexOneError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("rag service error: {0}")]
    Rag(#[from] rag_client::RagError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rag_client::RagError;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct FakeRunner {
        calls: Mutex<Vec<String>>,
    }

    impl FakeRunner {
        fn new() -> Self {
            Self { calls: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl GitRunner for FakeRunner {
        async fn run(&self, _cwd: &Path, args: &[&str]) -> std::io::Result<runner::GitOutput> {
            self.calls.lock().unwrap().push(args.join(" "));
            let stdout = if args.first() == Some(&"ls-files") {
                Vec::new()
            } else {
                Vec::new()
            };
            Ok(runner::GitOutput {
                status_success: true,
                stdout,
                stderr: String::new(),
            })
        }
    }

    struct FakeRag {
        indexed: AsyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl RagClient for FakeRag {
        async fn index_file(&self, request: IndexRequest) -> Result<(), RagError> {
            self.indexed.lock().await.push(request.file_id);
            Ok(())
        }
        async fn delete_file(&self, _user_id: &str, _file_id: &str) -> Result<(), RagError> {
            Ok(())
        }
        async fn fast_embed(&self, _user_id: &str, _text: &str) -> Result<Option<Vec<f32>>, RagError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn lifo_throttle_orders_by_mtime_descending_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("obsidian_vault");
        tokio::fs::create_dir_all(vault.join("notes")).await.unwrap();

        let mut candidates = Vec::new();
        for i in 0..25 {
            let path = vault.join("notes").join(format!("n{i}.md"));
            tokio::fs::write(&path, format!("content {i}")).await.unwrap();
            let modified = std::time::SystemTime::UNIX_EPOCH + Duration::from_secs(i as u64);
            candidates.push(Candidate {
                absolute_path: path,
                relative_path: format!("notes/n{i}.md"),
                modified,
            });
        }

        let rag = Arc::new(FakeRag { indexed: AsyncMutex::new(Vec::new()) });
        let hash_index = Arc::new(HashIndex::new(dir.path().to_path_buf()));
        let git_creds = Arc::new(GitCredStore::new(dir.path().to_path_buf()));
        let runner: Arc<dyn GitRunner> = Arc::new(FakeRunner::new());
        let sync = GitSync::new(
            runner,
            rag.clone(),
            hash_index,
            git_creds,
            10,
            Duration::from_millis(1),
        );

        let changed = sync.filter_changed("alice", candidates).await;
        let mut ordered = changed;
        ordered.sort_by(|a, b| b.modified.cmp(&a.modified));
        ordered.truncate(10);

        assert_eq!(ordered.len(), 10);
        assert_eq!(ordered[0].relative_path, "notes/n24.md");
        assert_eq!(ordered[9].relative_path, "notes/n15.md");
    }

    #[tokio::test]
    async fn commit_and_push_single_file_reports_no_push_when_nothing_to_commit() {
        let dir = tempfile::tempdir().unwrap();
        let vault = dir.path().join("obsidian_vault");
        tokio::fs::create_dir_all(&vault).await.unwrap();

        struct NoopCommitRunner;
        #[async_trait]
        impl GitRunner for NoopCommitRunner {
            async fn run(&self, _cwd: &Path, args: &[&str]) -> std::io::Result<runner::GitOutput> {
                let status_success = args.first() != Some(&"commit");
                Ok(runner::GitOutput { status_success, stdout: Vec::new(), stderr: String::new() })
            }
        }

        let rag = Arc::new(FakeRag { indexed: AsyncMutex::new(Vec::new()) });
        let hash_index = Arc::new(HashIndex::new(dir.path().to_path_buf()));
        let git_creds = Arc::new(GitCredStore::new(dir.path().to_path_buf()));
        let runner: Arc<dyn GitRunner> = Arc::new(NoopCommitRunner);
        let sync = GitSync::new(runner, rag, hash_index, git_creds, 10, Duration::from_millis(1));

        let pushed = sync
            .commit_and_push_file(&vault, "main", "a.md", FileAction::Added)
            .await
            .unwrap();
        assert!(!pushed);
    }
}
