//! Filesystem change notification for a single path

use crate::errors::PoolResult;

use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Changes that make handles opened on a path stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathChange {
    Removed,
    Renamed,
}

impl PathChange {
    fn from_kind(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Remove(_) => Some(PathChange::Removed),
            EventKind::Modify(ModifyKind::Name(_)) => Some(PathChange::Renamed),
            _ => None,
        }
    }
}

/// Watches one file and reports removals and renames.
///
/// The parent directory is watched rather than the file itself: unlinking a
/// file that still has open descriptors produces no event on the file, and a
/// directory watch keeps working after the file is recreated. Watching stops
/// when this value is dropped.
pub struct PathWatcher {
    path: PathBuf,
    _watcher: RecommendedWatcher,
}

impl PathWatcher {
    pub fn new<F>(path: impl AsRef<Path>, on_change: F) -> PoolResult<Self>
    where
        F: Fn(PathChange) + Send + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name: Option<OsString> = path.file_name().map(|n| n.to_os_string());

        let watched = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name().map(|n| n.to_os_string()) == name);
                if let Some(change) = PathChange::from_kind(&event.kind).filter(|_| ours) {
                    trace!(path = %watched.display(), ?change, "watched path changed");
                    on_change(change);
                }
            }
            Err(err) => warn!(path = %watched.display(), %err, "file watch error"),
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            path,
            _watcher: watcher,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
