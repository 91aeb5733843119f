//! File watcher for configuration documents.
//!
//! Watches a configuration directory and, when a `*.yml` document changes,
//! asks the matching registered documents to reload. Reads already reload
//! stale content lazily; the watcher only makes it happen promptly and
//! reports it. Uses debouncing to coalesce rapid file changes.

use super::registry::ConfigRegistry;
use super::store::CONFIG_EXTENSION;
use notify_debouncer_mini::{DebouncedEvent, DebouncedEventKind, new_debouncer};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Emitted for each registered document affected by a change on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadEvent {
    pub name: String,
    pub path: PathBuf,
    /// False when the document kept its content (e.g. unsaved edits).
    pub reloaded: bool,
}

/// Configuration for the file watcher.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Debounce duration for coalescing rapid changes.
    pub debounce_duration: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_duration: Duration::from_millis(500),
        }
    }
}

/// Handle to a running watcher. Dropping it stops the watcher.
pub struct ConfigWatcherHandle {
    /// Reload events, one per affected document.
    pub events: mpsc::Receiver<ReloadEvent>,
    debouncer: Option<notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for ConfigWatcherHandle {
    fn drop(&mut self) {
        // Dropping the debouncer closes the notify channel and ends the thread.
        self.debouncer.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Config watcher thread panicked");
        }
    }
}

/// Start watching `dir` for changes to documents held by `registry`.
pub fn start_config_watcher(
    registry: Arc<ConfigRegistry>,
    dir: &Path,
    config: WatcherConfig,
) -> Result<ConfigWatcherHandle, notify::Error> {
    let (event_tx, event_rx) = mpsc::channel();
    let (notify_tx, notify_rx) = mpsc::channel();

    let mut debouncer = new_debouncer(config.debounce_duration, notify_tx)?;
    if dir.exists() {
        info!("Watching config directory: {}", dir.display());
        debouncer
            .watcher()
            .watch(dir, notify::RecursiveMode::NonRecursive)?;
    } else {
        warn!(
            "Config directory does not exist, skipping watch: {}",
            dir.display()
        );
    }

    let thread = std::thread::Builder::new()
        .name("neon-config-watcher".to_string())
        .spawn(move || process_notify_events(notify_rx, event_tx, &registry))
        .map_err(notify::Error::io)?;

    Ok(ConfigWatcherHandle {
        events: event_rx,
        debouncer: Some(debouncer),
        thread: Some(thread),
    })
}

fn process_notify_events(
    rx: mpsc::Receiver<Result<Vec<DebouncedEvent>, notify::Error>>,
    tx: mpsc::Sender<ReloadEvent>,
    registry: &ConfigRegistry,
) {
    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let changed = changed_documents(events);
                for event in reload_matching(registry, &changed) {
                    debug!("Config change detected: {:?}", event);
                    if tx.send(event).is_err() {
                        info!("Config watcher receiver dropped, stopping");
                        return;
                    }
                }
            }
            Ok(Err(e)) => error!("File watcher error: {}", e),
            Err(_) => {
                info!("Config watcher channel closed, stopping");
                return;
            }
        }
    }
}

/// Configuration files among the debounced events, deduplicated.
fn changed_documents(events: Vec<DebouncedEvent>) -> BTreeSet<PathBuf> {
    events
        .into_iter()
        .filter(|event| {
            matches!(
                event.kind,
                DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
            )
        })
        .filter(|event| is_config_document(&event.path))
        .map(|event| event.path)
        .collect()
}

/// Whether `path` looks like a configuration document (not a lock, backup
/// or export file).
fn is_config_document(path: &Path) -> bool {
    let extension = path.extension().and_then(|e| e.to_str());
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    extension == Some(CONFIG_EXTENSION) && !file_name.starts_with('.')
}

/// Reload every registered document backed by one of `changed`.
pub fn reload_matching(registry: &ConfigRegistry, changed: &BTreeSet<PathBuf>) -> Vec<ReloadEvent> {
    registry
        .documents()
        .into_iter()
        .filter(|doc| changed.contains(doc.path()))
        .map(|doc| ReloadEvent {
            name: doc.name().to_string(),
            path: doc.path().to_path_buf(),
            reloaded: doc.check_reload(),
        })
        .collect()
}
