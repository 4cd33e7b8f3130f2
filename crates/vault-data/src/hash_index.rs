//! `sync_hashes.json`: the per-user map of absolute file path to the MD5 hex
//! digest of the content that was last successfully indexed (§4.7 step 5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use thiserror::Error;

const HASH_FILE_NAME: &str = "sync_hashes.json";

#[derive(Debug, Error)]
pub enum HashIndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize hash index: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Compute the 32-character lowercase hex MD5 digest of `content`.
pub fn hash_content(content: &[u8]) -> String {
    let digest = Md5::digest(content);
    hex::encode(digest)
}

/// Per-user `sync_hashes.json`: absolute path -> md5 hex of last-indexed content.
pub struct HashIndex {
    storage_root: PathBuf,
}

impl HashIndex {
    pub fn new(storage_root: PathBuf) -> Self {
        Self { storage_root }
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        obsidian_fs::user_dir(&self.storage_root, user_id).join(HASH_FILE_NAME)
    }

    /// Load the map. A missing or corrupt file is treated as empty, per the
    /// "well-formed JSON object or absent" invariant (§8).
    pub async fn load(&self, user_id: &str) -> HashMap<String, String> {
        let path = self.path_for(user_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    async fn save(&self, user_id: &str, map: &HashMap<String, String>) -> Result<(), HashIndexError> {
        let path = self.path_for(user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("tmp");
        {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            tokio::io::AsyncWriteExt::write_all(&mut file, &serde_json::to_vec(map)?).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// Record the new hash for `absolute_path` after a successful index.
    pub async fn record(
        &self,
        user_id: &str,
        absolute_path: &Path,
        content: &[u8],
    ) -> Result<(), HashIndexError> {
        let mut map = self.load(user_id).await;
        map.insert(
            absolute_path.to_string_lossy().into_owned(),
            hash_content(content),
        );
        self.save(user_id, &map).await
    }

    /// True if `content`'s hash differs from (or is absent from) the recorded
    /// hash for `absolute_path`.
    pub fn has_changed(
        map: &HashMap<String, String>,
        absolute_path: &Path,
        content: &[u8],
    ) -> bool {
        let key = absolute_path.to_string_lossy();
        map.get(key.as_ref()).map(|h| h.as_str()) != Some(hash_content(content).as_str())
    }

    /// The "force full reindex" primitive: delete the hash file outright.
    pub async fn force_reindex(&self, user_id: &str) -> Result<(), HashIndexError> {
        let path = self.path_for(user_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, user_id: &str) -> bool {
        tokio::fs::metadata(self.path_for(user_id)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn hash_content_is_stable_32_char_hex() {
        let h = hash_content(b"hello world");
        assert_eq!(h.len(), 32);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn record_then_detects_unchanged_content() {
        let dir = tempdir().unwrap();
        let index = HashIndex::new(dir.path().to_path_buf());
        let path = PathBuf::from("/storage/alice/obsidian_vault/a.md");
        index.record("alice", &path, b"hello").await.unwrap();

        let map = index.load("alice").await;
        assert!(!HashIndex::has_changed(&map, &path, b"hello"));
        assert!(HashIndex::has_changed(&map, &path, b"changed"));
    }

    #[tokio::test]
    async fn missing_file_treated_as_empty_map() {
        let dir = tempdir().unwrap();
        let index = HashIndex::new(dir.path().to_path_buf());
        assert!(index.load("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn force_reindex_deletes_the_file() {
        let dir = tempdir().unwrap();
        let index = HashIndex::new(dir.path().to_path_buf());
        let path = PathBuf::from("/storage/alice/obsidian_vault/a.md");
        index.record("alice", &path, b"hello").await.unwrap();
        assert!(index.exists("alice").await);

        index.force_reindex("alice").await.unwrap();
        assert!(!index.exists("alice").await);
    }
}
