//! Bulk tree operations: recursive copy under an inclusion predicate and
//! recursive delete.
//!
//! Siblings are processed one at a time; a directory call returns only after
//! its whole subtree is done. Entries that disappear mid-walk are skipped.

use crate::error::{is_not_found, Result, SyncError};
use crate::fs_util::{
    absolute_normalized, classify, ensure_directory_exists, path_exists, NodeKind,
};
use futures::future::{BoxFuture, FutureExt};
use std::path::{Path, PathBuf};

/// Decides whether an entry (and, for a directory, its whole subtree) is copied
pub trait InclusionPredicate: Send + Sync {
    fn includes(&self, path: &Path, kind: NodeKind) -> bool;
}

impl<F> InclusionPredicate for F
where
    F: Fn(&Path, NodeKind) -> bool + Send + Sync,
{
    fn includes(&self, path: &Path, kind: NodeKind) -> bool {
        self(path, kind)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeAll;

impl InclusionPredicate for IncludeAll {
    fn includes(&self, _path: &Path, _kind: NodeKind) -> bool {
        true
    }
}

/// Notified once per file copied during a bulk copy
pub trait CopyObserver: Send + Sync {
    fn copied(&self, source: &Path, destination: &Path);
}

impl<F> CopyObserver for F
where
    F: Fn(&Path, &Path) + Send + Sync,
{
    fn copied(&self, source: &Path, destination: &Path) {
        self(source, destination)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CopyObserver for NoopObserver {
    fn copied(&self, _source: &Path, _destination: &Path) {}
}

/// Copy the tree under `source` into `destination`
///
/// Both paths must be absolute. Entries the predicate rejects are skipped
/// without being visited; symlinks and special files are skipped with a
/// warning.
pub async fn recursive_copy(
    source: &Path,
    destination: &Path,
    predicate: &dyn InclusionPredicate,
    observer: &dyn CopyObserver,
) -> Result<()> {
    let source = absolute_normalized(source)?;
    let destination = absolute_normalized(destination)?;
    copy_tree(source, destination, predicate, observer).await
}

fn copy_tree<'a>(
    source: PathBuf,
    destination: PathBuf,
    predicate: &'a dyn InclusionPredicate,
    observer: &'a dyn CopyObserver,
) -> BoxFuture<'a, Result<()>> {
    async move {
        ensure_directory_exists(&destination).await?;

        let mut entries = match tokio::fs::read_dir(&source).await {
            Ok(entries) => entries,
            Err(e) if is_not_found(&e) => {
                tracing::debug!("{} vanished before it could be listed", source.display());
                return Ok(());
            }
            Err(e) => {
                return Err(SyncError::ReadDirError {
                    path: source,
                    source: e,
                })
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::ReadDirError {
                path: source.clone(),
                source: e,
            })?
        {
            let source_path = entry.path();
            let kind = classify(&source_path).await?;
            if !predicate.includes(&source_path, kind) {
                tracing::trace!("Excluded {} ({})", source_path.display(), kind);
                continue;
            }

            let destination_path = destination.join(entry.file_name());
            match kind {
                NodeKind::Directory => {
                    make_room(&destination_path, kind).await?;
                    copy_tree(source_path, destination_path, predicate, observer).await?;
                }
                NodeKind::File => {
                    make_room(&destination_path, kind).await?;
                    if copy_file(&source_path, &destination_path).await?.is_some() {
                        observer.copied(&source_path, &destination_path);
                    }
                }
                NodeKind::Nonexistent => {}
                NodeKind::Other => {
                    tracing::warn!(
                        "{} is neither a file nor a directory, so it was not copied",
                        source_path.display()
                    );
                }
            }
        }

        Ok(())
    }
    .boxed()
}

/// Copy one regular file, keeping its modification time
///
/// Returns `Ok(None)` if the source vanished before it could be copied,
/// otherwise the number of bytes written.
pub async fn copy_file(source: &Path, destination: &Path) -> Result<Option<u64>> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();

    let copied = tokio::task::spawn_blocking(move || {
        let source_meta = match std::fs::metadata(&source) {
            Ok(meta) => meta,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => {
                return Err(SyncError::CopyError {
                    path: source,
                    source: e,
                })
            }
        };

        let bytes_written =
            std::fs::copy(&source, &destination).map_err(|e| SyncError::CopyError {
                path: source.clone(),
                source: e,
            })?;

        if let Ok(mtime) = source_meta.modified() {
            if let Err(e) =
                filetime::set_file_mtime(&destination, filetime::FileTime::from_system_time(mtime))
            {
                tracing::debug!(
                    "Failed to preserve mtime on {}: {}",
                    destination.display(),
                    e
                );
            }
        }

        tracing::debug!(
            "Copied {} -> {} ({} bytes)",
            source.display(),
            destination.display(),
            bytes_written
        );

        Ok(Some(bytes_written))
    })
    .await
    .map_err(|e| SyncError::Io(std::io::Error::other(e.to_string())))?;

    match copied {
        // Only the source going away counts as a race; a missing destination
        // parent is a real failure
        Err(SyncError::CopyError { path, source }) if is_not_found(&source) => {
            if path_exists(&path).await {
                Err(SyncError::CopyError { path, source })
            } else {
                tracing::debug!("{} vanished before it could be copied", path.display());
                Ok(None)
            }
        }
        other => other,
    }
}

/// Delete `directory` and everything under it
///
/// A missing directory is a no-op, so repeating the call is always safe.
/// Symlinks and special files inside the tree are refused with
/// `SyncError::UnsupportedNodeKind`.
pub async fn recursive_delete(directory: &Path) -> Result<()> {
    let directory = absolute_normalized(directory)?;
    delete_tree(directory).await
}

fn delete_tree(directory: PathBuf) -> BoxFuture<'static, Result<()>> {
    async move {
        let mut entries = match tokio::fs::read_dir(&directory).await {
            Ok(entries) => entries,
            Err(e) if is_not_found(&e) => return Ok(()),
            Err(e) => {
                return Err(SyncError::ReadDirError {
                    path: directory,
                    source: e,
                })
            }
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::ReadDirError {
                path: directory.clone(),
                source: e,
            })?
        {
            let path = entry.path();
            match classify(&path).await? {
                NodeKind::Directory => delete_tree(path).await?,
                NodeKind::File => {
                    remove_file_if_present(&path).await?;
                }
                NodeKind::Nonexistent => {}
                NodeKind::Other => return Err(SyncError::UnsupportedNodeKind { path }),
            }
        }

        remove_dir_if_present(&directory).await?;
        tracing::debug!("Deleted directory {}", directory.display());
        Ok(())
    }
    .boxed()
}

/// Unlink a file; returns false if it was already gone
pub async fn remove_file_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(SyncError::RemoveError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

async fn remove_dir_if_present(path: &Path) -> Result<bool> {
    match tokio::fs::remove_dir(path).await {
        Ok(()) => Ok(true),
        Err(e) if is_not_found(&e) => Ok(false),
        Err(e) => Err(SyncError::RemoveError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Clear whatever sits at `destination` if it cannot hold an entry of `wanted` kind
///
/// A directory where a file belongs is deleted recursively, a file where a
/// directory belongs is unlinked, and a symlink is unlinked either way so
/// nothing is ever written through it.
pub async fn make_room(destination: &Path, wanted: NodeKind) -> Result<()> {
    let existing = classify(destination).await?;
    match (existing, wanted) {
        (NodeKind::Directory, NodeKind::File) => {
            tracing::debug!("Replacing directory {} with a file", destination.display());
            recursive_delete(destination).await
        }
        (NodeKind::File, NodeKind::Directory) | (NodeKind::Other, _) => {
            tracing::debug!("Replacing {} ({})", destination.display(), existing);
            remove_file_if_present(destination).await.map(|_| ())
        }
        _ => Ok(()),
    }
}
