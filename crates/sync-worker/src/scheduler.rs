//! The sync scheduler (§4.8): on a fixed interval, reconcile every configured,
//! non-stopped user's vault with bounded fan-out so one hung or panicking
//! user cannot starve the others.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use git_sync::GitSync;
use tokio::sync::Semaphore;
use vault_data::{GitCredStore, SyncConfigStore, UserLockRegistry};

const MAX_CONCURRENT_USERS: usize = 8;

pub struct Scheduler {
    storage_root: std::path::PathBuf,
    interval: Duration,
    git_sync: Arc<GitSync>,
    sync_configs: Arc<SyncConfigStore>,
    git_creds: Arc<GitCredStore>,
    locks: Arc<UserLockRegistry>,
}

impl Scheduler {
    pub fn new(
        storage_root: std::path::PathBuf,
        interval: Duration,
        git_sync: Arc<GitSync>,
        sync_configs: Arc<SyncConfigStore>,
        git_creds: Arc<GitCredStore>,
        locks: Arc<UserLockRegistry>,
    ) -> Self {
        Self {
            storage_root,
            interval,
            git_sync,
            sync_configs,
            git_creds,
            locks,
        }
    }

    /// Run forever, sleeping `interval` between cycles, until `shutdown` resolves.
    /// The in-flight cycle is always allowed to finish before returning.
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.run_cycle().await;
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown signal received, scheduler exiting after current cycle");
                    return;
                }
            }
        }
    }

    async fn discover_users(&self) -> Vec<String> {
        let mut out = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.storage_root).await else {
            return out;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Ok(file_type) = entry.file_type().await {
                if file_type.is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        out.push(name.to_string());
                    }
                }
            }
        }
        out
    }

    async fn run_cycle(&self) {
        let users = self.discover_users().await;
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_USERS));
        let mut handles = Vec::with_capacity(users.len());

        for user_id in users {
            let Some(config) = self.sync_configs.load(&user_id).await else {
                continue;
            };
            if config.stopped || config.has_placeholder() {
                continue;
            }

            let permit = semaphore.clone().acquire_owned().await;
            let git_sync = self.git_sync.clone();
            let sync_configs = self.sync_configs.clone();
            let git_creds = self.git_creds.clone();
            let locks = self.locks.clone();
            let storage_root = self.storage_root.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let _guard = locks.lock(&user_id).await;
                let vault_root = obsidian_fs::vault_root(&storage_root, &user_id);
                let token = match git_creds.lookup(&user_id, &config.repo_url).await {
                    Ok(token) => token,
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, error = %e, "failed to look up credentials");
                        None
                    }
                };

                match git_sync
                    .sync(&user_id, &config, &vault_root, token.as_deref())
                    .await
                {
                    Ok(report) => {
                        if let Err(e) = sync_configs.record_success(&user_id, config).await {
                            tracing::warn!(user_id = %user_id, error = %e, "failed to persist sync success");
                        }
                        tracing::info!(
                            user_id = %user_id,
                            files_indexed = report.files_indexed,
                            files_failed = report.files_failed,
                            pushed = report.pushed,
                            "sync cycle complete"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, error = %e, "sync cycle failed");
                        if let Err(e) = sync_configs.record_failure(&user_id, config, e.to_string()).await {
                            tracing::warn!(user_id = %user_id, error = %e, "failed to persist sync failure");
                        }
                    }
                }
            }));
        }

        let total = handles.len();
        let mut succeeded = 0usize;
        for handle in handles {
            match handle.await {
                Ok(()) => succeeded += 1,
                Err(e) => tracing::error!(error = %e, "sync task panicked"),
            }
        }
        tracing::info!(users = total, completed = succeeded, "sync cycle summary");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_users_lists_only_directories() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("alice")).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("bob")).await.unwrap();
        tokio::fs::write(dir.path().join("not-a-user.txt"), b"x").await.unwrap();

        let git_creds = Arc::new(GitCredStore::new(dir.path().to_path_buf()));
        let sync_configs = Arc::new(SyncConfigStore::new(dir.path().to_path_buf()));
        let hash_index = Arc::new(vault_data::HashIndex::new(dir.path().to_path_buf()));
        let runner: Arc<dyn git_sync::runner::GitRunner> = Arc::new(git_sync::runner::SystemGitRunner);
        let rag: Arc<dyn rag_client::RagClient> =
            Arc::new(rag_client::ReqwestRagClient::new("http://localhost", "secret"));
        let git_sync = Arc::new(GitSync::new(
            runner,
            rag,
            hash_index,
            git_creds.clone(),
            10,
            Duration::from_millis(1),
        ));
        let scheduler = Scheduler::new(
            dir.path().to_path_buf(),
            Duration::from_secs(60),
            git_sync,
            sync_configs,
            git_creds,
            Arc::new(UserLockRegistry::new()),
        );

        let mut users = scheduler.discover_users().await;
        users.sort();
        assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);
    }
}
