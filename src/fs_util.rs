use crate::error::{is_not_found, Result, SyncError};
use std::fmt;
use std::fs::FileType;
use std::path::{Component, Path, PathBuf};

/// What a path currently is on disk
///
/// `Nonexistent` is an ordinary outcome: a path reported by the watcher or
/// listed by `read_dir` may be gone by the time it is looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
    Nonexistent,
    /// Symlinks, sockets, FIFOs, devices
    Other,
}

impl NodeKind {
    fn from_file_type(file_type: FileType) -> Self {
        // lstat semantics: a symlink is Other even if it points at a file or directory
        if file_type.is_dir() {
            NodeKind::Directory
        } else if file_type.is_file() {
            NodeKind::File
        } else {
            NodeKind::Other
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::File => "file",
            NodeKind::Directory => "directory",
            NodeKind::Nonexistent => "nonexistent",
            NodeKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Classify a path without following symlinks
///
/// Absence maps to `NodeKind::Nonexistent`. Every other stat failure is an error.
pub async fn classify(path: &Path) -> Result<NodeKind> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => Ok(NodeKind::from_file_type(metadata.file_type())),
        Err(e) if is_not_found(&e) => Ok(NodeKind::Nonexistent),
        Err(e) => Err(SyncError::Metadata {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Create a directory and any missing ancestors; existing directories are fine
pub async fn ensure_directory_exists(path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| SyncError::CreateDirError {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Whether anything exists at `path`, following symlinks
///
/// Errors count as absent, so a dangling symlink is reported as missing.
pub async fn path_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}

/// Require an absolute path and normalize it lexically
///
/// `.` components are dropped and `..` pops the previous component, never
/// climbing above the filesystem root. Symlinks are not resolved.
pub fn absolute_normalized(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(SyncError::RelativePath {
            path: path.to_path_buf(),
        });
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(name) => normalized.push(name),
        }
    }

    Ok(normalized)
}

/// Resolve a possibly relative path against `base`, then normalize
pub fn resolve_against(base: &Path, path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        absolute_normalized(path)
    } else {
        absolute_normalized(&base.join(path))
    }
}
