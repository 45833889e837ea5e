//! File-system watching for file-watch triggers.

use crate::error::{Result, TriggerError};
use glob::Pattern;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use runwarden_common::types::FileWatchTrigger;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// An open watcher plus the stream of matching changed paths. Dropping it
/// stops the watch.
pub struct PathWatch {
    _watcher: RecommendedWatcher,
    pub events: mpsc::UnboundedReceiver<PathBuf>,
}

/// Starts watching `config.path`. Fails with `PathNotFound` if it does not exist.
pub fn open(config: &FileWatchTrigger) -> Result<PathWatch> {
    let root = Path::new(&config.path);
    if !root.exists() {
        return Err(TriggerError::PathNotFound(config.path.clone()));
    }
    let pattern = compile_pattern(&config.pattern)?;
    let (tx, rx) = mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !is_change(&event.kind) {
                return;
            }
            for path in event.paths {
                if matches_pattern(&pattern, &path) {
                    // Receiver gone means the trigger was disarmed.
                    let _ = tx.send(path);
                }
            }
        }
        Err(e) => tracing::error!(error = %e, "File watcher error"),
    })?;

    let mode = if config.include_subdirectories {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher.watch(root, mode)?;

    Ok(PathWatch {
        _watcher: watcher,
        events: rx,
    })
}

fn is_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Compiles a file-name glob. An empty pattern matches everything.
pub fn compile_pattern(pattern: &str) -> Result<Pattern> {
    let pattern = if pattern.is_empty() { "*" } else { pattern };
    Pattern::new(pattern).map_err(|_| TriggerError::InvalidPattern(pattern.to_string()))
}

/// Matches the glob against the file name only.
pub fn matches_pattern(pattern: &Pattern, path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| pattern.matches(name))
}

/// Waits for the next change and, with a debounce window, keeps absorbing
/// changes until the stream has been quiet for the whole window. Returns
/// the last path seen, or `None` once canceled or the stream closes.
pub async fn next_change(
    events: &mut mpsc::UnboundedReceiver<PathBuf>,
    debounce: Option<Duration>,
    cancel: &CancellationToken,
) -> Option<PathBuf> {
    let mut last = tokio::select! {
        _ = cancel.cancelled() => return None,
        path = events.recv() => path?,
    };

    let Some(window) = debounce.filter(|w| !w.is_zero()) else {
        return Some(last);
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            next = tokio::time::timeout(window, events.recv()) => match next {
                Ok(Some(path)) => last = path,
                Ok(None) | Err(_) => return Some(last),
            },
        }
    }
}
