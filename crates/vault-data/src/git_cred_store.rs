//! Per-user Git credential persistence (§4.3). Credentials flow only through
//! the `git credential` helper protocol; they never appear in a remote URL.

use std::path::PathBuf;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const CREDENTIALS_FILE_NAME: &str = ".git-credentials";

#[derive(Debug, Error)]
pub enum GitCredStoreError {
    #[error("failed to spawn git credential helper: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("git credential helper exited with status {0}")]
    HelperFailed(std::process::ExitStatus),
    #[error("repo_url could not be parsed into protocol/host/path: {0}")]
    UnparseableUrl(String),
}

struct ParsedUrl {
    protocol: String,
    host: String,
    path: String,
}

fn parse_url(url: &str) -> Result<ParsedUrl, GitCredStoreError> {
    let (protocol, rest) = url
        .split_once("://")
        .ok_or_else(|| GitCredStoreError::UnparseableUrl(url.to_string()))?;
    let rest = rest.split_once('@').map(|(_, r)| r).unwrap_or(rest);
    let (host, path) = rest
        .split_once('/')
        .ok_or_else(|| GitCredStoreError::UnparseableUrl(url.to_string()))?;
    Ok(ParsedUrl {
        protocol: protocol.to_string(),
        host: host.to_string(),
        path: path.to_string(),
    })
}

/// Strip any embedded `user[:pass]@` from a remote URL before it is ever used
/// as a Git remote. Credentials are stored exclusively via [`GitCredStore`].
pub fn clean_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    match rest.split_once('@') {
        Some((_, after)) => format!("{scheme}://{after}"),
        None => url.to_string(),
    }
}

/// Persists a Git credential-helper store file (`⟨user_dir⟩/.git-credentials`)
/// per user, using `git credential approve`/`fill` so the file format always
/// matches whatever the installed `git` expects.
pub struct GitCredStore {
    storage_root: PathBuf,
}

impl GitCredStore {
    pub fn new(storage_root: PathBuf) -> Self {
        Self { storage_root }
    }

    fn credentials_path(&self, user_id: &str) -> PathBuf {
        obsidian_fs::user_dir(&self.storage_root, user_id).join(CREDENTIALS_FILE_NAME)
    }

    /// Run `git -c credential.helper="store --file=<path>" credential <op>`,
    /// writing the attribute block to stdin and returning stdout (used by
    /// `fill` to read back `username=`/`password=` lines).
    async fn run_credential(
        &self,
        user_id: &str,
        op: &str,
        parsed: &ParsedUrl,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<String, GitCredStoreError> {
        let path = self.credentials_path(user_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut child = Command::new("git")
            .arg("-c")
            .arg(format!("credential.helper=store --file={}", path.display()))
            .arg("credential")
            .arg(op)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        let mut input = format!(
            "protocol={}\nhost={}\npath={}\n",
            parsed.protocol, parsed.host, parsed.path
        );
        if let Some(username) = username {
            input.push_str(&format!("username={username}\n"));
        }
        if let Some(password) = password {
            input.push_str(&format!("password={password}\n"));
        }
        input.push('\n');

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(input.as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(GitCredStoreError::HelperFailed(output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Install (or refresh) a user's credential for `repo_url` via
    /// `git credential approve`. No-op if `token` is empty — some repos are
    /// public and need no credential.
    pub async fn install(
        &self,
        user_id: &str,
        repo_url: &str,
        token: &str,
    ) -> Result<(), GitCredStoreError> {
        if token.is_empty() {
            return Ok(());
        }
        let parsed = parse_url(repo_url)?;
        self.run_credential(user_id, "approve", &parsed, Some("git"), Some(token))
            .await?;
        Ok(())
    }

    /// Look up a previously-installed token for `repo_url` via
    /// `git credential fill`, if any.
    pub async fn lookup(&self, user_id: &str, repo_url: &str) -> Result<Option<String>, GitCredStoreError> {
        let path = self.credentials_path(user_id);
        if tokio::fs::metadata(&path).await.is_err() {
            return Ok(None);
        }
        let parsed = parse_url(repo_url)?;
        let output = self.run_credential(user_id, "fill", &parsed, None, None).await?;
        Ok(output
            .lines()
            .find_map(|line| line.strip_prefix("password=").map(str::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_embedded_credentials() {
        assert_eq!(
            clean_url("https://tok:x@github.com/u/r.git"),
            "https://github.com/u/r.git"
        );
        assert_eq!(
            clean_url("https://github.com/u/r.git"),
            "https://github.com/u/r.git"
        );
    }

    #[test]
    fn parses_protocol_host_path() {
        let parsed = parse_url("https://github.com/alice/vault.git").unwrap();
        assert_eq!(parsed.protocol, "https");
        assert_eq!(parsed.host, "github.com");
        assert_eq!(parsed.path, "alice/vault.git");
    }

    #[tokio::test]
    async fn install_is_noop_for_empty_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = GitCredStore::new(dir.path().to_path_buf());
        store
            .install("alice", "https://github.com/alice/vault.git", "")
            .await
            .unwrap();
        assert!(tokio::fs::metadata(dir.path().join("alice/.git-credentials"))
            .await
            .is_err());
    }
}
