//! Per-user vault layout and path-traversal-safe name resolution.
//!
//! A vault lives at `⟨root⟩/⟨user⟩/obsidian_vault/`. Every name a tool
//! receives from a caller is resolved through [`resolve`] before it touches
//! disk; [`exclude`] decides whether a path participates in listing,
//! indexing, or search.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

pub const VAULT_DIR_NAME: &str = "obsidian_vault";

#[derive(Debug, Error)]
pub enum PathError {
    #[error("path traversal")]
    PathTraversal,
    #[error("not found")]
    NotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-user storage directory: `root/user`.
pub fn user_dir(root: &Path, user: &str) -> PathBuf {
    root.join(user)
}

/// Per-user vault checkout directory: `root/user/obsidian_vault`.
pub fn vault_root(root: &Path, user: &str) -> PathBuf {
    user_dir(root, user).join(VAULT_DIR_NAME)
}

/// Ensure both the user directory and the vault directory exist, returning the vault root.
pub async fn ensure_vault_root(root: &Path, user: &str) -> Result<PathBuf, PathError> {
    let vault = vault_root(root, user);
    tokio::fs::create_dir_all(&vault).await?;
    Ok(vault)
}

/// Normalize a caller-supplied name: strip a leading `/`, and tolerate (strip once) a
/// leading `obsidian_vault/` prefix, since callers sometimes pass fully-qualified paths.
fn normalize_name(name: &str) -> &str {
    let name = name.strip_prefix('/').unwrap_or(name);
    name.strip_prefix(&format!("{VAULT_DIR_NAME}/"))
        .unwrap_or(name)
}

/// Resolve `name` to an absolute path inside `vault_root`.
///
/// The name is normalized (see [`normalize_name`]), lexically joined to
/// `vault_root`, then the *real* path (resolving symlinks on whatever prefix
/// of it already exists) is checked to be a descendant of the real
/// `vault_root`. Any attempt to escape via `..` or a symlink is
/// [`PathError::PathTraversal`].
pub async fn resolve(vault_root: &Path, name: &str) -> Result<PathBuf, PathError> {
    let normalized = normalize_name(name);

    // Reject any `..` component outright; this is the cheap, syntactic half of the check.
    for component in Path::new(normalized).components() {
        match component {
            Component::ParentDir => return Err(PathError::PathTraversal),
            Component::Prefix(_) | Component::RootDir => return Err(PathError::PathTraversal),
            _ => {}
        }
    }

    let candidate = vault_root.join(normalized);
    let real_vault_root = real_path(vault_root).await?;
    let real_candidate = real_path(&candidate).await?;

    if real_candidate.starts_with(&real_vault_root) {
        Ok(candidate)
    } else {
        Err(PathError::PathTraversal)
    }
}

/// Resolve symlinks for whatever longest existing ancestor of `path` there is, then
/// re-append the remaining (not-yet-existing) components lexically.
async fn real_path(path: &Path) -> Result<PathBuf, PathError> {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();

    loop {
        match tokio::fs::canonicalize(&existing).await {
            Ok(real) => {
                let mut result = real;
                for component in tail.into_iter().rev() {
                    result.push(component);
                }
                return Ok(result);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let Some(file_name) = existing.file_name().map(|n| n.to_os_string()) else {
                    // Ran out of ancestors (reached root) without finding anything that exists.
                    return Ok(path.to_path_buf());
                };
                tail.push(file_name);
                if !existing.pop() {
                    return Ok(path.to_path_buf());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// True if `path` should be excluded from listing, indexing, and search: any path
/// segment relative to `vault_root` starts with `.`, or `path` is not a descendant
/// of `vault_root` at all.
pub fn exclude(vault_root: &Path, path: &Path) -> bool {
    match path.strip_prefix(vault_root) {
        Ok(relative) => relative
            .components()
            .any(|c| matches!(c, Component::Normal(s) if s.to_string_lossy().starts_with('.'))),
        Err(_) => true,
    }
}

/// One file entry in a vault listing.
#[derive(Debug, Clone)]
pub struct ListedFile {
    pub name: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// One subdirectory entry in a vault listing.
#[derive(Debug, Clone)]
pub struct ListedDir {
    pub name: String,
    pub file_count: usize,
    pub dir_count: usize,
}

/// A directory listing: immediate files and immediate subdirectories, both
/// filtered by [`exclude`]. Subdirectory counts are recursive.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub files: Vec<ListedFile>,
    pub dirs: Vec<ListedDir>,
}

/// List the contents of `directory` (an absolute path that must be a descendant of
/// `vault_root`, typically produced by [`resolve`]).
pub async fn list_dir(vault_root: &Path, directory: &Path) -> Result<Listing, PathError> {
    let mut read_dir = match tokio::fs::read_dir(directory).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(PathError::NotFound),
        Err(e) => return Err(e.into()),
    };

    let mut listing = Listing::default();
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if exclude(vault_root, &path) {
            continue;
        }
        let file_type = entry.file_type().await?;
        let name = entry.file_name().to_string_lossy().into_owned();

        if file_type.is_dir() {
            let (file_count, dir_count) = count_recursive(vault_root, &path).await?;
            listing.dirs.push(ListedDir {
                name,
                file_count,
                dir_count,
            });
        } else if file_type.is_file() {
            let metadata = entry.metadata().await?;
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            listing.files.push(ListedFile {
                name,
                size_bytes: metadata.len(),
                modified,
            });
        }
    }

    Ok(listing)
}

fn count_recursive<'a>(
    vault_root: &'a Path,
    dir: &'a Path,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(usize, usize), PathError>> + Send + 'a>> {
    Box::pin(async move {
        let mut files = 0usize;
        let mut dirs = 0usize;
        let mut read_dir = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if exclude(vault_root, &path) {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                dirs += 1;
                let (f, d) = count_recursive(vault_root, &path).await?;
                files += f;
                dirs += d;
            } else if file_type.is_file() {
                files += 1;
            }
        }
        Ok((files, dirs))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn resolves_plain_name_inside_vault() {
        let dir = tempdir().unwrap();
        let vault = ensure_vault_root(dir.path(), "alice").await.unwrap();
        let resolved = resolve(&vault, "notes/a.md").await.unwrap();
        assert_eq!(resolved, vault.join("notes/a.md"));
    }

    #[tokio::test]
    async fn strips_leading_slash() {
        let dir = tempdir().unwrap();
        let vault = ensure_vault_root(dir.path(), "alice").await.unwrap();
        let resolved = resolve(&vault, "/notes/a.md").await.unwrap();
        assert_eq!(resolved, vault.join("notes/a.md"));
    }

    #[tokio::test]
    async fn strips_obsidian_vault_prefix_once() {
        let dir = tempdir().unwrap();
        let vault = ensure_vault_root(dir.path(), "alice").await.unwrap();
        let resolved = resolve(&vault, "obsidian_vault/notes/a.md").await.unwrap();
        assert_eq!(resolved, vault.join("notes/a.md"));
    }

    #[tokio::test]
    async fn rejects_directory_traversal() {
        let dir = tempdir().unwrap();
        let vault = ensure_vault_root(dir.path(), "alice").await.unwrap();
        let err = resolve(&vault, "../../evil.txt").await.unwrap_err();
        assert!(matches!(err, PathError::PathTraversal));
    }

    #[tokio::test]
    async fn rejects_traversal_hidden_behind_existing_subdir() {
        let dir = tempdir().unwrap();
        let vault = ensure_vault_root(dir.path(), "alice").await.unwrap();
        tokio::fs::create_dir_all(vault.join("notes")).await.unwrap();
        let err = resolve(&vault, "notes/../../../escape.txt").await.unwrap_err();
        assert!(matches!(err, PathError::PathTraversal));
    }

    #[test]
    fn excludes_hidden_segments() {
        let vault = Path::new("/storage/alice/obsidian_vault");
        assert!(exclude(vault, &vault.join(".git/config")));
        assert!(exclude(vault, &vault.join("notes/.obsidian/workspace")));
        assert!(!exclude(vault, &vault.join("notes/a.md")));
    }

    #[test]
    fn excludes_paths_outside_vault_root() {
        let vault = Path::new("/storage/alice/obsidian_vault");
        assert!(exclude(vault, Path::new("/storage/bob/obsidian_vault/a.md")));
    }

    #[tokio::test]
    async fn list_dir_reports_not_found_for_missing_directory() {
        let dir = tempdir().unwrap();
        let vault = ensure_vault_root(dir.path(), "alice").await.unwrap();
        let err = list_dir(&vault, &vault.join("missing")).await.unwrap_err();
        assert!(matches!(err, PathError::NotFound));
    }

    #[tokio::test]
    async fn list_dir_excludes_hidden_files_and_counts_recursively() {
        let dir = tempdir().unwrap();
        let vault = ensure_vault_root(dir.path(), "alice").await.unwrap();
        tokio::fs::write(vault.join("a.md"), "hi").await.unwrap();
        tokio::fs::create_dir_all(vault.join(".git")).await.unwrap();
        tokio::fs::write(vault.join(".git/config"), "x").await.unwrap();
        tokio::fs::create_dir_all(vault.join("notes")).await.unwrap();
        tokio::fs::write(vault.join("notes/b.md"), "yo").await.unwrap();

        let listing = list_dir(&vault, &vault).await.unwrap();
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "a.md");
        assert_eq!(listing.dirs.len(), 1);
        assert_eq!(listing.dirs[0].name, "notes");
        assert_eq!(listing.dirs[0].file_count, 1);
    }
}
