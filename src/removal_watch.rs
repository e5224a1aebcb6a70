use std::collections::VecDeque;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

/// Watches asset roots for file removals so the host can feed
/// `ImportSession::files_removed` and drop stale cache entries.
pub struct RemovalWatcher {
    watcher: RecommendedWatcher,
    rx: Receiver<notify::Result<Event>>,
    roots: Vec<PathBuf>,
}

impl RemovalWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher
            .configure(
                NotifyConfig::default()
                    .with_compare_contents(false)
                    .with_poll_interval(Duration::from_millis(300)),
            )
            .context("configure removal watcher")?;
        Ok(Self { watcher, rx, roots: Vec::new() })
    }

    /// Registers a root to watch. Registration is idempotent per normalized path.
    pub fn watch_root(&mut self, root: impl AsRef<Path>) -> Result<()> {
        let root = root.as_ref();
        if !root.exists() {
            anyhow::bail!("path '{}' does not exist", root.display());
        }
        let normalized = normalize_watch_path(root);
        if self.roots.iter().any(|existing| *existing == normalized) {
            return Ok(());
        }
        let mode = if normalized.is_dir() { RecursiveMode::Recursive } else { RecursiveMode::NonRecursive };
        self.watcher
            .watch(&normalized, mode)
            .with_context(|| format!("watch {}", normalized.display()))?;
        self.roots.push(normalized);
        Ok(())
    }

    /// Paths removed under the watched roots since the last drain.
    pub fn drain_removed(&mut self) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        let mut backlog: VecDeque<notify::Result<Event>> = VecDeque::new();
        while let Ok(event) = self.rx.try_recv() {
            backlog.push_back(event);
        }
        while let Some(event) = backlog.pop_front() {
            match event {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Remove(_)) {
                        continue;
                    }
                    for path in event.paths {
                        if !removed.contains(&path) {
                            removed.push(path);
                        }
                    }
                }
                Err(err) => eprintln!("[import] removal watcher error: {err}"),
            }
        }
        removed
    }
}

fn normalize_watch_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else if let Ok(cwd) = env::current_dir() {
        cwd.join(path)
    } else {
        path.to_path_buf()
    };
    fs::canonicalize(&absolute).unwrap_or(absolute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_paths_are_absolute() {
        let normalized = normalize_watch_path(Path::new("assets/images"));
        assert!(normalized.is_absolute());
    }

    #[test]
    fn watching_a_missing_root_fails() {
        let mut watcher = RemovalWatcher::new().expect("watcher");
        assert!(watcher.watch_root("definitely/not/a/real/path").is_err());
    }

    #[test]
    fn watch_root_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut watcher = RemovalWatcher::new().expect("watcher");
        watcher.watch_root(dir.path()).expect("watch");
        watcher.watch_root(dir.path()).expect("watch again");
        assert_eq!(watcher.roots.len(), 1);
    }
}
