//! Filesystem notifications, coalesced and classified.
//!
//! `notify-debouncer-mini` reports only which paths changed within a window.
//! The kind of change is recovered by comparing the path's current state on
//! disk against the last tree scan.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tracing::{debug, warn};

use super::node::NodeType;
use super::tree::TreeSnapshot;
use crate::error::SessionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchKind {
    Add,
    AddDir,
    Change,
    Unlink,
    UnlinkDir,
}

impl WatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WatchKind::Add => "add",
            WatchKind::AddDir => "addDir",
            WatchKind::Change => "change",
            WatchKind::Unlink => "unlink",
            WatchKind::UnlinkDir => "unlinkDir",
        }
    }

    /// Anything but a content change alters the tree.
    pub fn is_structural(self) -> bool {
        self != WatchKind::Change
    }
}

/// Keeps the underlying OS watcher alive. Dropping it stops notifications.
pub struct PathWatcher {
    debouncer: Debouncer<RecommendedWatcher>,
    watched: HashSet<PathBuf>,
}

impl PathWatcher {
    /// Make the set of watched directories exactly `dirs`, each watched
    /// non-recursively. Returns how many are now watched.
    pub fn watch_dirs<I>(&mut self, dirs: I) -> usize
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let wanted: HashSet<PathBuf> = dirs.into_iter().collect();

        let stale: Vec<PathBuf> = self.watched.difference(&wanted).cloned().collect();
        for dir in stale {
            // Removed directories lose their OS watch on their own
            if let Err(e) = self.debouncer.watcher().unwatch(&dir) {
                debug!(dir = %dir.display(), "Unwatch skipped: {}", e);
            }
            self.watched.remove(&dir);
        }

        for dir in wanted {
            if self.watched.contains(&dir) {
                continue;
            }
            match self.debouncer.watcher().watch(&dir, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    self.watched.insert(dir);
                }
                Err(e) => warn!(dir = %dir.display(), "Cannot watch directory: {}", e),
            }
        }
        self.watched.len()
    }

    pub fn is_watching(&self, dir: &Path) -> bool {
        self.watched.contains(dir)
    }
}

/// Watch `root`, handing each coalesced batch of changed paths to `on_batch`.
///
/// `on_batch` runs on the watcher's own thread and must not block.
pub fn watch<F>(
    root: &Path,
    mode: RecursiveMode,
    window: Duration,
    on_batch: F,
) -> Result<PathWatcher, SessionError>
where
    F: Fn(Vec<PathBuf>) + Send + 'static,
{
    let mut debouncer = new_debouncer(window, move |result: DebounceEventResult| match result {
        Ok(events) => {
            let paths: Vec<PathBuf> = events.into_iter().map(|e| e.path).collect();
            if !paths.is_empty() {
                on_batch(paths);
            }
        }
        Err(e) => warn!("Watcher error: {:?}", e),
    })?;
    debouncer.watcher().watch(root, mode)?;
    debug!(root = %root.display(), ?window, "Watching");
    Ok(PathWatcher {
        debouncer,
        watched: HashSet::from([root.to_path_buf()]),
    })
}

/// Work out what happened to `path` since `known` was scanned.
///
/// `registered` marks paths held open outside the scanned tree, so their
/// disappearance still counts. Returns `None` for no visible change (a
/// directory's own metadata, or a path that came and went within one window).
pub fn classify(path: &Path, known: &TreeSnapshot, registered: bool) -> Option<WatchKind> {
    let previous = known.node_type(path);
    match std::fs::symlink_metadata(path) {
        Ok(meta) => {
            let now = NodeType::from_file_type(meta.file_type());
            match previous {
                None if now.is_dir() => Some(WatchKind::AddDir),
                None if registered => Some(WatchKind::Change),
                None => Some(WatchKind::Add),
                Some(_) if now.is_dir() => None,
                Some(_) => Some(WatchKind::Change),
            }
        }
        Err(_) => match previous {
            Some(t) if t.is_dir() => Some(WatchKind::UnlinkDir),
            Some(_) => Some(WatchKind::Unlink),
            None if registered => Some(WatchKind::Unlink),
            None => None,
        },
    }
}
