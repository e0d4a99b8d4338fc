use anyhow::Result;
use glob::Pattern;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use crate::scope::ScopeKey;

/// Events emitted by a scope's file watcher
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// One or more files changed in the scope's worktree — time to refresh
    FilesChanged { scope: ScopeKey, paths: Vec<String> },
}

/// Decide whether a changed path should trigger a refresh.
///
/// `.git/index` (staging) and `.git/refs/` (commits) pass through, other
/// `.git/` noise (objects, logs) is dropped, and configured ignore globs
/// suppress editor/daemon churn.
fn path_passes_filter(path: &str, ignore: &[Pattern]) -> bool {
    if path.contains("/.git/") {
        return path.ends_with("/.git/index") || path.contains("/.git/refs/");
    }
    !ignore.iter().any(|pattern| pattern.matches(path))
}

/// A debounced watcher over one scope's worktree. Dropping it stops the
/// watch.
pub struct FileWatcher {
    _watcher: notify_debouncer_mini::Debouncer<RecommendedWatcher>,
}

impl FileWatcher {
    /// Start watching `root` for `scope`. Filtered change events are sent to
    /// `tx`, debounced by `debounce_ms` milliseconds.
    pub fn new(
        root: &Path,
        scope: ScopeKey,
        debounce_ms: u64,
        ignore: Vec<Pattern>,
        tx: mpsc::Sender<WatchEvent>,
    ) -> Result<Self> {
        let mut debouncer = new_debouncer(
            Duration::from_millis(debounce_ms),
            move |result: std::result::Result<
                Vec<notify_debouncer_mini::DebouncedEvent>,
                notify::Error,
            >| {
                let events = match result {
                    Ok(events) => events,
                    Err(err) => {
                        // Hitting the OS watch limit stops event delivery;
                        // the loader's polling fallback covers that case.
                        log::warn!("watcher error for {}: {}", scope, err);
                        return;
                    }
                };
                let paths: Vec<String> = events
                    .iter()
                    .filter(|e| e.kind == DebouncedEventKind::Any)
                    .map(|e| e.path.to_string_lossy().to_string())
                    .filter(|p| path_passes_filter(p, &ignore))
                    .collect();

                if !paths.is_empty() {
                    let _ = tx.send(WatchEvent::FilesChanged {
                        scope: scope.clone(),
                        paths,
                    });
                }
            },
        )?;

        debouncer.watcher().watch(root, RecursiveMode::Recursive)?;

        Ok(FileWatcher { _watcher: debouncer })
    }
}
