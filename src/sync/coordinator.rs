//! Keeps a destination tree converged with a source tree.
//!
//! The watcher is armed before the initial mirror starts, and queued events
//! are applied only after the mirror completes. A single dispatcher applies
//! one event at a time, so updates and removals of the same path never
//! interleave. Every path is re-classified when its event is handled.

use crate::error::{Result, SyncError};
use crate::fs_util::{absolute_normalized, classify, ensure_directory_exists, NodeKind};
use crate::sync::mirror::{
    copy_file, make_room, recursive_copy, recursive_delete, remove_file_if_present, CopyObserver,
    InclusionPredicate, NoopObserver,
};
use crate::sync::output::SyncEvent;
use crate::sync::watch::{ChangeEvent, ChangeKind, ChangeNotifier, ChangeSource};
use crate::sync::SyncStats;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Source and destination roots plus the filter deciding what is mirrored
#[derive(Clone)]
pub struct SyncSession {
    source_root: PathBuf,
    destination_root: PathBuf,
    filter: Arc<dyn InclusionPredicate>,
}

impl SyncSession {
    pub fn new(
        source_root: &Path,
        destination_root: &Path,
        filter: Arc<dyn InclusionPredicate>,
    ) -> Result<Self> {
        Ok(Self {
            source_root: absolute_normalized(source_root)?,
            destination_root: absolute_normalized(destination_root)?,
            filter,
        })
    }

    /// Re-root a source path under the destination
    ///
    /// The path is normalized first, so `..` segments cannot climb out of
    /// the destination root; paths outside the source root are rejected.
    pub fn map_to_destination(&self, source_path: &Path) -> Result<PathBuf> {
        let path = absolute_normalized(source_path)?;
        let relative = path
            .strip_prefix(&self.source_root)
            .map_err(|_| SyncError::OutsideRoot {
                path: path.clone(),
                root: self.source_root.clone(),
            })?;
        Ok(self.destination_root.join(relative))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Updated in the source, gone before it could be copied
    Vanished,
    /// Removed from the source, already absent from the destination
    AlreadyGone,
    NotFileOrDirectory,
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            IgnoreReason::Vanished => "vanished before it could be copied",
            IgnoreReason::AlreadyGone => "already gone",
            IgnoreReason::NotFileOrDirectory => "neither a file nor a directory",
        };
        f.write_str(reason)
    }
}

/// What handling one change event did to the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    CopiedFile { destination: PathBuf },
    CopiedTree { destination: PathBuf, files: usize },
    DeletedFile { destination: PathBuf },
    DeletedTree { destination: PathBuf },
    Ignored { path: PathBuf, reason: IgnoreReason },
}

pub struct SyncCoordinator<S: ChangeSource> {
    session: SyncSession,
    changes: S,
    observer: Arc<dyn CopyObserver>,
    stats: SyncStats,
    json: bool,
}

impl SyncCoordinator<ChangeNotifier> {
    /// Arm a native watcher over the source root
    ///
    /// Events start queueing immediately; nothing is copied until `run`.
    pub async fn start(session: SyncSession) -> Result<Self> {
        let changes =
            ChangeNotifier::watch(&session.source_root, session.filter.clone()).await?;
        tracing::info!("Watching {}", session.source_root.display());
        Ok(Self::with_source(session, changes))
    }
}

impl<S: ChangeSource> SyncCoordinator<S> {
    pub fn with_source(session: SyncSession, changes: S) -> Self {
        Self {
            session,
            changes,
            observer: Arc::new(NoopObserver),
            stats: SyncStats::default(),
            json: false,
        }
    }

    /// Called for every file copied, during the initial mirror and afterwards
    pub fn with_observer(mut self, observer: Arc<dyn CopyObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Emit NDJSON records for deletions and ignored events
    pub fn with_json_output(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn map_to_destination(&self, source_path: &Path) -> Result<PathBuf> {
        self.session.map_to_destination(source_path)
    }

    /// Copy the whole filtered source tree into the destination
    pub async fn initial_mirror(&mut self) -> Result<usize> {
        let files = self
            .copy_subtree(&self.session.source_root, &self.session.destination_root)
            .await?;
        self.stats.files_copied += files;
        Ok(files)
    }

    /// Mirror the source, then apply change events until the source closes
    ///
    /// Returns the first error; there is no retry.
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!(
            "Mirroring {} → {}",
            self.session.source_root.display(),
            self.session.destination_root.display()
        );
        let files = self.initial_mirror().await?;
        tracing::info!("Initial mirror complete: {} files copied", files);

        while let Some(event) = self.changes.next_event().await {
            let event = event?;
            let applied = match self.handle_event(&event).await {
                Ok(applied) => applied,
                Err(e) => {
                    tracing::error!(
                        "Failed to apply {:?} for {}: {}",
                        event.kind,
                        event.path.display(),
                        e
                    );
                    return Err(e);
                }
            };
            self.report(&applied);
            self.stats.record(&applied);
        }

        tracing::debug!("Change source closed");
        Ok(())
    }

    /// Apply the smallest change that brings the destination in line with
    /// what the source holds now for `event.path`
    pub async fn handle_event(&self, event: &ChangeEvent) -> Result<Applied> {
        let source_path = absolute_normalized(&event.path)?;
        match event.kind {
            ChangeKind::Updated => self.apply_update(&source_path).await,
            ChangeKind::Removed => self.apply_removal(&source_path).await,
        }
    }

    /// Stop receiving events; safe to call more than once
    pub fn shutdown(&mut self) {
        if !self.changes.is_closed() {
            self.changes.close();
            tracing::info!("Stopped watching {}", self.session.source_root.display());
        }
    }

    async fn apply_update(&self, source_path: &Path) -> Result<Applied> {
        let destination = self.map_to_destination(source_path)?;

        match classify(source_path).await? {
            NodeKind::File => {
                make_room(&destination, NodeKind::File).await?;
                if let Some(parent) = destination.parent() {
                    ensure_directory_exists(parent).await?;
                }
                if copy_file(source_path, &destination).await?.is_none() {
                    return Ok(self.ignored(source_path, IgnoreReason::Vanished));
                }
                self.observer.copied(source_path, &destination);
                Ok(Applied::CopiedFile { destination })
            }
            NodeKind::Directory => {
                make_room(&destination, NodeKind::Directory).await?;
                let files = self.copy_subtree(source_path, &destination).await?;
                tracing::debug!("Mirrored {} ({} files)", destination.display(), files);
                Ok(Applied::CopiedTree { destination, files })
            }
            NodeKind::Nonexistent => Ok(self.ignored(source_path, IgnoreReason::Vanished)),
            NodeKind::Other => Ok(self.ignored(source_path, IgnoreReason::NotFileOrDirectory)),
        }
    }

    async fn apply_removal(&self, source_path: &Path) -> Result<Applied> {
        // A removal that lost the race with a re-creation: converge to the
        // source as it is now
        if classify(source_path).await? != NodeKind::Nonexistent {
            tracing::debug!("{} exists again, treating removal as update", source_path.display());
            return self.apply_update(source_path).await;
        }

        // The source is gone, so the destination is the only place left to look
        let destination = self.map_to_destination(source_path)?;
        match classify(&destination).await? {
            NodeKind::File => {
                remove_file_if_present(&destination).await?;
                tracing::debug!("Deleted {}", destination.display());
                Ok(Applied::DeletedFile { destination })
            }
            NodeKind::Directory => {
                recursive_delete(&destination).await?;
                Ok(Applied::DeletedTree { destination })
            }
            NodeKind::Nonexistent => Ok(self.ignored(&destination, IgnoreReason::AlreadyGone)),
            NodeKind::Other => Ok(self.ignored(&destination, IgnoreReason::NotFileOrDirectory)),
        }
    }

    async fn copy_subtree(&self, source: &Path, destination: &Path) -> Result<usize> {
        let copied = AtomicUsize::new(0);
        let inner = self.observer.as_ref();
        let counting = |from: &Path, to: &Path| {
            copied.fetch_add(1, Ordering::Relaxed);
            inner.copied(from, to);
        };
        recursive_copy(source, destination, self.session.filter.as_ref(), &counting).await?;
        Ok(copied.load(Ordering::Relaxed))
    }

    fn ignored(&self, path: &Path, reason: IgnoreReason) -> Applied {
        match reason {
            IgnoreReason::NotFileOrDirectory => {
                tracing::warn!("Ignoring {}: {}", path.display(), reason)
            }
            _ => tracing::debug!("Ignoring {}: {}", path.display(), reason),
        }
        Applied::Ignored {
            path: path.to_path_buf(),
            reason,
        }
    }

    fn report(&self, applied: &Applied) {
        if !self.json {
            return;
        }
        // Copies are reported by the observer, one record per file
        let event = match applied {
            Applied::CopiedFile { .. } | Applied::CopiedTree { .. } => return,
            Applied::DeletedFile { destination } => SyncEvent::Delete {
                path: destination.clone(),
                tree: false,
            },
            Applied::DeletedTree { destination } => SyncEvent::Delete {
                path: destination.clone(),
                tree: true,
            },
            Applied::Ignored { path, reason } => SyncEvent::Ignore {
                path: path.clone(),
                reason: reason.to_string(),
            },
        };
        event.emit();
    }
}
