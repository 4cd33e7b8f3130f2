//! Shared, process-wide state for the Tool Gateway (C9/C10/C11/C1/C2).

use std::sync::Arc;

use git_sync::GitSync;
use rag_client::RagClient;
use vault_data::{Config, GitCredStore, HashIndex, SyncConfigStore, UserLockRegistry, UserStore};
use vector_query::VectorSearch;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub users: Arc<UserStore>,
    pub sync_configs: Arc<SyncConfigStore>,
    pub git_creds: Arc<GitCredStore>,
    pub hash_index: Arc<HashIndex>,
    pub locks: Arc<UserLockRegistry>,
    pub rag: Arc<dyn RagClient>,
    pub vector_db: Arc<dyn VectorSearch>,
    pub git_sync: Arc<GitSync>,
}
