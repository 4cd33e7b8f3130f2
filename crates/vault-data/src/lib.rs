//! Shared per-user storage state for obsidian-sync: environment configuration,
//! the bearer-token/auth-code store, the on-disk sync configuration (with its
//! circuit-breaker state machine), the content-hash index, and the Git
//! credential store.

pub mod config;
pub mod git_cred_store;
pub mod hash_index;
pub mod locks;
pub mod sync_config;
pub mod user_store;

pub use config::{Config, ConfigError, VectorDbConfig};
pub use git_cred_store::{GitCredStore, GitCredStoreError};
pub use hash_index::{HashIndex, HashIndexError};
pub use locks::UserLockRegistry;
pub use sync_config::{SyncConfig, SyncConfigStore, SyncConfigStoreError, MAX_CONSECUTIVE_FAILURES};
pub use user_store::UserStore;
