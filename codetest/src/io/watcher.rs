//! Polling file watcher feeding watch-mode restarts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Watch `paths` and call `on_change` for each create/modify event that hits
/// one of them. Dropping the returned watcher stops watching.
pub fn watch_files<F>(paths: &[PathBuf], on_change: F) -> Result<PollWatcher>
where
    F: Fn(&Path) + Send + 'static,
{
    let watched: Vec<PathBuf> = paths.iter().map(|path| normalize(path)).collect();
    let filter = watched.clone();
    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| match res {
            Ok(event) => {
                if let Some(path) = changed_path(&event, &filter) {
                    debug!(path = %path.display(), "watched file changed");
                    on_change(path);
                }
            }
            Err(err) => warn!(error = %err, "file watcher error"),
        },
        notify::Config::default().with_poll_interval(POLL_INTERVAL),
    )
    .context("create file watcher")?;

    for path in &watched {
        watcher
            .watch(path, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", path.display()))?;
        info!(path = %path.display(), "watching file");
    }
    Ok(watcher)
}

/// A watcher over a set of files that can be re-pointed at a new set, e.g.
/// after the spec file names different sources.
pub struct WatchedFiles<F> {
    paths: Vec<PathBuf>,
    on_change: F,
    _watcher: PollWatcher,
}

impl<F> WatchedFiles<F>
where
    F: Fn(&Path) + Clone + Send + 'static,
{
    pub fn new(paths: Vec<PathBuf>, on_change: F) -> Result<Self> {
        let watcher = watch_files(&paths, on_change.clone())?;
        Ok(Self {
            paths,
            on_change,
            _watcher: watcher,
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Rebuild the watcher when `paths` differs from the watched set.
    /// Returns whether it was rebuilt; on error the old watcher stays active.
    pub fn update(&mut self, paths: Vec<PathBuf>) -> Result<bool> {
        if paths == self.paths {
            return Ok(false);
        }
        let watcher = watch_files(&paths, self.on_change.clone())?;
        info!(files = paths.len(), "watched files changed");
        self._watcher = watcher;
        self.paths = paths;
        Ok(true)
    }
}

/// First watched path touched by a create/modify event.
fn changed_path<'a>(event: &NotifyEvent, watched: &'a [PathBuf]) -> Option<&'a Path> {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return None;
    }
    event.paths.iter().find_map(|path| {
        let path = normalize(path);
        watched
            .iter()
            .find(|candidate| **candidate == path)
            .map(PathBuf::as_path)
    })
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
