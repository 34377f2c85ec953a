//! Filesystem change notifications, reduced to "updated" or "removed" paths
//! inside a watched root.

use crate::error::{Result, SyncError};
use crate::fs_util::{absolute_normalized, classify, NodeKind};
use crate::sync::mirror::InclusionPredicate;
use async_trait::async_trait;
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Created or modified; the path may hold a file or a whole new subtree
    Updated,
    /// Gone from the source tree
    Removed,
}

/// A change reported for a path in source-tree coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

impl ChangeEvent {
    pub fn updated(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Updated,
            path: path.into(),
        }
    }

    pub fn removed(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: ChangeKind::Removed,
            path: path.into(),
        }
    }
}

/// A stream of change events the coordinator consumes
#[async_trait]
pub trait ChangeSource: Send {
    /// Next event, or `None` once the source is closed or exhausted
    async fn next_event(&mut self) -> Option<Result<ChangeEvent>>;

    /// Stop delivering events. Calling it again does nothing.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// How a raw notification maps onto a change, before the filesystem is consulted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawChange {
    Updated,
    Removed,
    /// The backend did not say; settled by checking whether the path exists
    Unknown,
}

fn translate(event: &notify::Event) -> Vec<(RawChange, PathBuf)> {
    let all = |change: RawChange| -> Vec<(RawChange, PathBuf)> {
        event.paths.iter().map(|p| (change, p.clone())).collect()
    };

    match event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => all(RawChange::Updated),
        EventKind::Remove(_) => all(RawChange::Removed),
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Metadata(_)) => {
            all(RawChange::Updated)
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(RawChange::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(RawChange::Updated),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.as_slice() {
            [from, to] => vec![
                (RawChange::Removed, from.clone()),
                (RawChange::Updated, to.clone()),
            ],
            _ => all(RawChange::Unknown),
        },
        EventKind::Modify(_) | EventKind::Any | EventKind::Other => all(RawChange::Unknown),
    }
}

/// Watches a source tree recursively through the platform's native backend
///
/// Events are queued from the moment `watch` returns, so nothing is lost
/// while the caller is busy with an initial copy.
pub struct ChangeNotifier {
    root: PathBuf,
    /// `root` with symlinks resolved; some backends report paths under it
    canonical_root: PathBuf,
    filter: Arc<dyn InclusionPredicate>,
    watcher: Option<RecommendedWatcher>,
    raw_events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    pending: VecDeque<ChangeEvent>,
    closed: bool,
}

impl ChangeNotifier {
    pub async fn watch(root: &Path, filter: Arc<dyn InclusionPredicate>) -> Result<Self> {
        let root = absolute_normalized(root)?;
        let canonical_root =
            tokio::fs::canonicalize(&root)
                .await
                .map_err(|e| SyncError::Metadata {
                    path: root.clone(),
                    source: e,
                })?;
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(
            move |res: notify::Result<notify::Event>| {
                let _ = tx.send(res);
            },
        )?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        if canonical_root != root {
            tracing::debug!("Watching {} (resolves to {})", root.display(), canonical_root.display());
        } else {
            tracing::debug!("Watching {}", root.display());
        }
        Ok(Self::with_receiver(root, canonical_root, filter, Some(watcher), rx))
    }

    fn with_receiver(
        root: PathBuf,
        canonical_root: PathBuf,
        filter: Arc<dyn InclusionPredicate>,
        watcher: Option<RecommendedWatcher>,
        raw_events: mpsc::UnboundedReceiver<notify::Result<notify::Event>>,
    ) -> Self {
        Self {
            root,
            canonical_root,
            filter,
            watcher,
            raw_events,
            pending: VecDeque::new(),
            closed: false,
        }
    }
}

/// Express a reported path under `root` when the backend reported it under
/// the resolved `canonical_root`
fn reroot(path: PathBuf, root: &Path, canonical_root: &Path) -> PathBuf {
    if path.starts_with(root) {
        return path;
    }
    match path.strip_prefix(canonical_root) {
        Ok(relative) if relative.as_os_str().is_empty() => root.to_path_buf(),
        Ok(relative) => root.join(relative),
        Err(_) => path,
    }
}

/// Turn one raw change into an event, or drop it if it lies outside `root`
/// or the filter rejects it
async fn admit(
    root: &Path,
    canonical_root: &Path,
    filter: &dyn InclusionPredicate,
    change: RawChange,
    path: PathBuf,
) -> Result<Option<ChangeEvent>> {
    let path = reroot(absolute_normalized(&path)?, root, canonical_root);
    let Ok(relative) = path.strip_prefix(root) else {
        tracing::debug!("Ignoring event outside {}: {}", root.display(), path.display());
        return Ok(None);
    };

    // Every ancestor below the root must be an accepted directory
    let mut ancestor = root.to_path_buf();
    let mut components = relative.components().peekable();
    while let Some(component) = components.next() {
        if components.peek().is_none() {
            break;
        }
        ancestor.push(component);
        if !filter.includes(&ancestor, NodeKind::Directory) {
            return Ok(None);
        }
    }

    // A vanished leaf has no kind left to judge
    if change == RawChange::Removed {
        return Ok(Some(ChangeEvent::removed(path)));
    }

    let kind = classify(&path).await?;
    if change == RawChange::Unknown && kind == NodeKind::Nonexistent {
        return Ok(Some(ChangeEvent::removed(path)));
    }

    if path != root && !filter.includes(&path, kind) {
        return Ok(None);
    }

    Ok(Some(ChangeEvent::updated(path)))
}

#[async_trait]
impl ChangeSource for ChangeNotifier {
    async fn next_event(&mut self) -> Option<Result<ChangeEvent>> {
        loop {
            if self.closed {
                return None;
            }
            if let Some(event) = self.pending.pop_front() {
                return Some(Ok(event));
            }

            let event = match self.raw_events.recv().await? {
                Ok(event) => event,
                Err(e) => return Some(Err(SyncError::Watch(e))),
            };

            if event.need_rescan() {
                tracing::warn!("Watcher dropped events, rescanning {}", self.root.display());
                self.pending.push_back(ChangeEvent::updated(self.root.clone()));
                continue;
            }

            for (change, path) in translate(&event) {
                match admit(
                    &self.root,
                    &self.canonical_root,
                    self.filter.as_ref(),
                    change,
                    path,
                ).await {
                    Ok(Some(change_event)) => self.pending.push_back(change_event),
                    Ok(None) => {}
                    Err(e) => return Some(Err(e)),
                }
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Dropping the watcher ends the native subscription
        drop(self.watcher.take());
        self.raw_events.close();
        self.pending.clear();
        tracing::debug!("Stopped watching {}", self.root.display());
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::mirror::IncludeAll;
    use notify::event::{CreateKind, DataChange, Flag, RemoveKind};
    use notify::Event;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn queued(
        root: &Path,
        filter: Arc<dyn InclusionPredicate>,
    ) -> (
        ChangeNotifier,
        mpsc::UnboundedSender<notify::Result<notify::Event>>,
    ) {
        queued_with_canonical(root, root, filter)
    }

    fn queued_with_canonical(
        root: &Path,
        canonical_root: &Path,
        filter: Arc<dyn InclusionPredicate>,
    ) -> (
        ChangeNotifier,
        mpsc::UnboundedSender<notify::Result<notify::Event>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifier = ChangeNotifier::with_receiver(
            root.to_path_buf(),
            canonical_root.to_path_buf(),
            filter,
            None,
            rx,
        );
        (notifier, tx)
    }

    #[test]
    fn test_translate_kinds() {
        let p = PathBuf::from("/src/file.txt");
        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(p.clone());
        let write = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(p.clone());
        let remove = Event::new(EventKind::Remove(RemoveKind::File)).add_path(p.clone());
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(p.clone());

        assert_eq!(translate(&create), vec![(RawChange::Updated, p.clone())]);
        assert_eq!(translate(&write), vec![(RawChange::Updated, p.clone())]);
        assert_eq!(translate(&remove), vec![(RawChange::Removed, p.clone())]);
        assert!(translate(&access).is_empty());
    }

    #[test]
    fn test_translate_renames() {
        let from = PathBuf::from("/src/old.txt");
        let to = PathBuf::from("/src/new.txt");
        let both = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from.clone())
            .add_path(to.clone());
        let any = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any)))
            .add_path(to.clone());

        assert_eq!(
            translate(&both),
            vec![(RawChange::Removed, from), (RawChange::Updated, to.clone())]
        );
        assert_eq!(translate(&any), vec![(RawChange::Unknown, to)]);
    }

    #[tokio::test]
    async fn test_queued_events_are_classified() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::write(root.join("present.txt"), "x").unwrap();
        let (mut notifier, tx) = queued(&root, Arc::new(IncludeAll));

        let any = |path: PathBuf| {
            Ok(Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Any))).add_path(path))
        };
        tx.send(any(root.join("present.txt"))).unwrap();
        tx.send(any(root.join("absent.txt"))).unwrap();

        assert_eq!(
            notifier.next_event().await.unwrap().unwrap(),
            ChangeEvent::updated(root.join("present.txt"))
        );
        assert_eq!(
            notifier.next_event().await.unwrap().unwrap(),
            ChangeEvent::removed(root.join("absent.txt"))
        );
    }

    #[tokio::test]
    async fn test_filter_applies_to_ancestors() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        fs::create_dir_all(root.join("secret/inner")).unwrap();
        fs::write(root.join("secret/inner/file.txt"), "x").unwrap();
        fs::write(root.join("public.txt"), "x").unwrap();

        let filter = |path: &Path, kind: NodeKind| {
            !(kind == NodeKind::Directory && path.file_name().is_some_and(|n| n == "secret"))
        };
        let (mut notifier, tx) = queued(&root, Arc::new(filter));

        let create = |path: PathBuf| Ok(Event::new(EventKind::Create(CreateKind::Any)).add_path(path));
        tx.send(create(root.join("secret/inner/file.txt"))).unwrap();
        tx.send(Ok(
            Event::new(EventKind::Remove(RemoveKind::Any)).add_path(root.join("secret/gone.txt"))
        ))
        .unwrap();
        tx.send(create(root.join("public.txt"))).unwrap();
        drop(tx);

        assert_eq!(
            notifier.next_event().await.unwrap().unwrap(),
            ChangeEvent::updated(root.join("public.txt"))
        );
        assert!(notifier.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_events_outside_root_are_dropped() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir(&root).unwrap();
        let (mut notifier, tx) = queued(&root, Arc::new(IncludeAll));

        tx.send(Ok(Event::new(EventKind::Remove(RemoveKind::Any))
            .add_path(temp.path().join("elsewhere.txt"))))
            .unwrap();
        tx.send(Ok(Event::new(EventKind::Remove(RemoveKind::Any))
            .add_path(root.join("../root/inside.txt"))))
            .unwrap();

        assert_eq!(
            notifier.next_event().await.unwrap().unwrap(),
            ChangeEvent::removed(root.join("inside.txt"))
        );
    }

    #[tokio::test]
    async fn test_rescan_becomes_root_update() {
        let temp = TempDir::new().unwrap();
        let (mut notifier, tx) = queued(temp.path(), Arc::new(IncludeAll));

        tx.send(Ok(Event::new(EventKind::Other).set_flag(Flag::Rescan)))
            .unwrap();

        assert_eq!(
            notifier.next_event().await.unwrap().unwrap(),
            ChangeEvent::updated(temp.path())
        );
    }

    #[tokio::test]
    async fn test_backend_error_is_surfaced() {
        let temp = TempDir::new().unwrap();
        let (mut notifier, tx) = queued(temp.path(), Arc::new(IncludeAll));

        tx.send(Err(notify::Error::generic("queue overflow"))).unwrap();

        assert!(matches!(
            notifier.next_event().await,
            Some(Err(SyncError::Watch(_)))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mut notifier = ChangeNotifier::watch(temp.path(), Arc::new(IncludeAll))
            .await
            .unwrap();

        assert!(!notifier.is_closed());
        notifier.close();
        notifier.close();
        assert!(notifier.is_closed());
        assert!(notifier.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_native_watcher_reports_new_file() {
        let temp = TempDir::new().unwrap();
        let root = absolute_normalized(temp.path()).unwrap();
        let mut notifier = ChangeNotifier::watch(&root, Arc::new(IncludeAll))
            .await
            .unwrap();

        let target = root.join("new.txt");
        fs::write(&target, "v1").unwrap();

        let found = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = notifier.next_event().await {
                let event = event.unwrap();
                if event.kind == ChangeKind::Updated && event.path.ends_with("new.txt") {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        assert!(found);
    }

    #[test]
    fn test_reroot_maps_resolved_paths() {
        let root = Path::new("/var/data");
        let canonical = Path::new("/private/var/data");

        assert_eq!(
            reroot(PathBuf::from("/private/var/data/a/b.txt"), root, canonical),
            PathBuf::from("/var/data/a/b.txt")
        );
        assert_eq!(
            reroot(PathBuf::from("/private/var/data"), root, canonical),
            PathBuf::from("/var/data")
        );
        assert_eq!(
            reroot(PathBuf::from("/var/data/c.txt"), root, canonical),
            PathBuf::from("/var/data/c.txt")
        );
        assert_eq!(
            reroot(PathBuf::from("/elsewhere/d.txt"), root, canonical),
            PathBuf::from("/elsewhere/d.txt")
        );
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_events_under_resolved_root_are_admitted() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real");
        let link = temp.path().join("link");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();
        fs::write(real.join("new.txt"), "x").unwrap();

        let (mut notifier, tx) = queued_with_canonical(&link, &real, Arc::new(IncludeAll));
        tx.send(Ok(
            Event::new(EventKind::Create(CreateKind::File)).add_path(real.join("new.txt"))
        ))
        .unwrap();
        tx.send(Ok(
            Event::new(EventKind::Remove(RemoveKind::File)).add_path(real.join("gone.txt"))
        ))
        .unwrap();

        assert_eq!(
            notifier.next_event().await.unwrap().unwrap(),
            ChangeEvent::updated(link.join("new.txt"))
        );
        assert_eq!(
            notifier.next_event().await.unwrap().unwrap(),
            ChangeEvent::removed(link.join("gone.txt"))
        );
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_native_watcher_through_symlinked_root() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real");
        let link = temp.path().join("link");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let root = absolute_normalized(&link).unwrap();

        let mut notifier = ChangeNotifier::watch(&root, Arc::new(IncludeAll))
            .await
            .unwrap();
        fs::write(real.join("new.txt"), "v1").unwrap();

        let expected = root.join("new.txt");
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = notifier.next_event().await {
                let event = event.unwrap();
                if event.kind == ChangeKind::Updated && event.path == expected {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        assert!(found);
    }
}
