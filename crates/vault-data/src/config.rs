use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {source}")]
    InvalidValue {
        var: &'static str,
        #[source]
        source: std::num::ParseFloatError,
    },
    #[error("invalid integer for {var}: {source}")]
    InvalidInt {
        var: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("storage root '{0}' does not exist and could not be created: {1}")]
    StorageRootUnavailable(PathBuf, std::io::Error),
}

/// Everything both binaries read from the environment, resolved exactly once at
/// startup and threaded through from there (nothing re-reads `std::env` afterwards).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub storage_root: PathBuf,
    pub rag_api_url: String,
    pub rag_api_jwt_secret: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub sync_interval_secs: u64,
    pub max_files_per_cycle: usize,
    pub index_delay_secs: f64,
    pub vectordb: VectorDbConfig,
}

#[derive(Debug, Clone)]
pub struct VectorDbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl VectorDbConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_int(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|source| ConfigError::InvalidInt { var: name, source }),
        Err(_) => Ok(default),
    }
}

fn env_float(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    match std::env::var(name) {
        Ok(v) => v
            .parse()
            .map_err(|source| ConfigError::InvalidValue { var: name, source }),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Read every environment variable named in the external interfaces contract
    /// exactly once. Fails fast (an error here should abort startup with a
    /// non-zero exit code) rather than panicking, so callers can log context.
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage_root = PathBuf::from(env_or("STORAGE_ROOT", "/storage"));
        if let Err(e) = std::fs::create_dir_all(&storage_root) {
            if !storage_root.is_dir() {
                return Err(ConfigError::StorageRootUnavailable(storage_root, e));
            }
        }

        let rag_api_jwt_secret = std::env::var("RAG_API_JWT_SECRET")
            .or_else(|_| std::env::var("JWT_SECRET"))
            .unwrap_or_default();

        Ok(Self {
            port: env_int("PORT", 3003)? as u16,
            host: env_or("HOST", "0.0.0.0"),
            storage_root,
            rag_api_url: env_or("RAG_API_URL", "http://librechat-rag-api:8000"),
            rag_api_jwt_secret,
            chunk_size: env_int("CHUNK_SIZE", 1500)? as usize,
            chunk_overlap: env_int("CHUNK_OVERLAP", 100)? as usize,
            sync_interval_secs: env_int("SYNC_INTERVAL", 60)?,
            max_files_per_cycle: env_int("MAX_FILES_PER_CYCLE", 10)? as usize,
            index_delay_secs: env_float("INDEX_DELAY", 0.5)?,
            vectordb: VectorDbConfig {
                host: env_or("VECTORDB_HOST", "localhost"),
                port: env_int("VECTORDB_PORT", 5432)? as u16,
                database: env_or("VECTORDB_DB", "librechat"),
                user: env_or("VECTORDB_USER", "postgres"),
                password: env_or("VECTORDB_PASSWORD", ""),
            },
        })
    }

    pub fn user_dir(&self, user_id: &str) -> PathBuf {
        obsidian_fs::user_dir(&self.storage_root, user_id)
    }

    pub fn vault_root(&self, user_id: &str) -> PathBuf {
        obsidian_fs::vault_root(&self.storage_root, user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_int_falls_back_to_default() {
        unsafe { std::env::remove_var("OBSIDIAN_SYNC_TEST_INT") };
        assert_eq!(env_int("OBSIDIAN_SYNC_TEST_INT", 42).unwrap(), 42);
    }

    #[test]
    fn env_float_parses_overridden_value() {
        unsafe { std::env::set_var("OBSIDIAN_SYNC_TEST_FLOAT", "1.25") };
        assert_eq!(env_float("OBSIDIAN_SYNC_TEST_FLOAT", 0.5).unwrap(), 1.25);
        unsafe { std::env::remove_var("OBSIDIAN_SYNC_TEST_FLOAT") };
    }

    #[test]
    fn vectordb_connection_string_interpolates_fields() {
        let cfg = VectorDbConfig {
            host: "db".into(),
            port: 5432,
            database: "rag".into(),
            user: "u".into(),
            password: "p".into(),
        };
        assert_eq!(cfg.connection_string(), "postgres://u:p@db:5432/rag");
    }
}
