//! The narrow Git command seam (§9 design note: "should become dependency
//! injection"). Production code shells out to the `git` binary; tests
//! substitute a fake that records invocations instead of touching disk/network.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub status_success: bool,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

#[async_trait]
pub trait GitRunner: Send + Sync {
    /// Run `git <args>` with `cwd` as the working directory (ignored for
    /// `clone`, where `cwd` is the parent directory the checkout is created
    /// under and the destination is the last argument).
    async fn run(&self, cwd: &Path, args: &[&str]) -> std::io::Result<GitOutput>;
}

/// Shells out to the system `git` binary via `tokio::process::Command`.
pub struct SystemGitRunner;

#[async_trait]
impl GitRunner for SystemGitRunner {
    async fn run(&self, cwd: &Path, args: &[&str]) -> std::io::Result<GitOutput> {
        let output = tokio::process::Command::new("git")
            .current_dir(cwd)
            .args(args)
            .output()
            .await?;
        Ok(GitOutput {
            status_success: output.status.success(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// One discovered markdown file candidate before hash-filtering.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub modified: std::time::SystemTime,
}
