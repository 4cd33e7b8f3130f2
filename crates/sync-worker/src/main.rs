//! sync-worker: the background reconciliation process (§4.7, §4.8). Pulls
//! every configured user's vault, indexes changed notes with the RAG
//! service, and pushes local edits back upstream.

mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use git_sync::runner::SystemGitRunner;
use git_sync::GitSync;
use rag_client::ReqwestRagClient;
use scheduler::Scheduler;
use vault_data::{Config, GitCredStore, HashIndex, SyncConfigStore, UserLockRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env().context("failed to load configuration from environment")?;
    tracing::info!(
        storage_root = %config.storage_root.display(),
        sync_interval_secs = config.sync_interval_secs,
        max_files_per_cycle = config.max_files_per_cycle,
        "sync-worker starting"
    );

    let rag: Arc<dyn rag_client::RagClient> = Arc::new(ReqwestRagClient::new(
        config.rag_api_url.clone(),
        config.rag_api_jwt_secret.clone(),
    ));
    let hash_index = Arc::new(HashIndex::new(config.storage_root.clone()));
    let git_creds = Arc::new(GitCredStore::new(config.storage_root.clone()));
    let sync_configs = Arc::new(SyncConfigStore::new(config.storage_root.clone()));
    let locks = Arc::new(UserLockRegistry::new());
    let runner: Arc<dyn git_sync::runner::GitRunner> = Arc::new(SystemGitRunner);

    let git_sync = Arc::new(GitSync::new(
        runner,
        rag,
        hash_index,
        git_creds.clone(),
        config.max_files_per_cycle,
        Duration::from_secs_f64(config.index_delay_secs),
    ));

    let scheduler = Scheduler::new(
        config.storage_root.clone(),
        Duration::from_secs(config.sync_interval_secs),
        git_sync,
        sync_configs,
        git_creds,
        locks,
    );

    scheduler.run(shutdown_signal()).await;
    tracing::info!("sync-worker shut down cleanly");
    Ok(())
}

/// Resolves once either Ctrl+C or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
