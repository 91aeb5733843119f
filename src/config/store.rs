//! On-disk YAML configuration documents.
//!
//! A [`ConfigDocument`] wraps one `<name>.yml` file. Reads check the file
//! stamp first and reparse when another writer changed the file. Writes are
//! optimistic: the stamp recorded at the last load must still match the file
//! on disk, otherwise the write is skipped and reported as `false`.
//!
//! Every mutation is also recorded in a journal, so [`ConfigDocument::commit`]
//! and the reconciliation operations can reload and replay once when they
//! lose a race against another writer.

use super::lock::LockTable;
use super::merge::{self, delete_keys_recursive, deep_merge};
use super::stamp::{FileStamp, StatSource};
use crate::error::{ConfigError, Result};
use parking_lot::Mutex;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// File extension of configuration documents.
pub const CONFIG_EXTENSION: &str = "yml";

/// Recorded edit, replayed after a reload when a write loses a race.
#[derive(Debug, Clone)]
enum Mutation {
    Set { key: String, value: Value },
    Remove(String),
    RemoveRecursive(Vec<String>),
    Merge(Mapping),
    Overlay(Mapping),
}

impl Mutation {
    fn apply(&self, content: &mut Mapping) {
        match self {
            Mutation::Set { key, value } => {
                content.insert(Value::String(key.clone()), value.clone());
            }
            Mutation::Remove(key) => {
                content.retain(|k, _| k.as_str() != Some(key.as_str()));
            }
            Mutation::RemoveRecursive(keys) => {
                let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                delete_keys_recursive(content, &keys);
            }
            Mutation::Merge(other) => {
                deep_merge(content, other);
            }
            Mutation::Overlay(other) => {
                for (key, value) in other {
                    content.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

/// Result of one write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    /// Content matches the last sync and nothing is pending.
    Unchanged,
    /// The file changed on disk since it was loaded.
    Conflict,
    Failed,
}

#[derive(Debug, Default)]
struct DocState {
    content: Mapping,
    loaded: Option<FileStamp>,
    fingerprint: Option<String>,
    pending_write: bool,
    journal: Vec<Mutation>,
    #[cfg(test)]
    fail_next_write: bool,
}

impl DocState {
    fn record(&mut self, mutation: Mutation) {
        mutation.apply(&mut self.content);
        self.journal.push(mutation);
        self.pending_write = true;
    }

    /// Truncate the file and fail, once, after `fail_next_write` is set.
    #[cfg(test)]
    fn injected_write_failure(&mut self, path: &Path) -> Result<()> {
        if !std::mem::take(&mut self.fail_next_write) {
            return Ok(());
        }
        fs::write(path, "").map_err(|e| ConfigError::io(path, e))?;
        Err(ConfigError::io(path, std::io::Error::other("injected write failure")))
    }

    #[cfg(not(test))]
    fn injected_write_failure(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

/// One YAML configuration file and its in-memory content.
pub struct ConfigDocument {
    name: String,
    path: PathBuf,
    detached: bool,
    locks: Arc<LockTable>,
    stat: Arc<dyn StatSource>,
    state: Mutex<DocState>,
}

impl fmt::Debug for ConfigDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigDocument")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("detached", &self.detached)
            .finish_non_exhaustive()
    }
}

impl ConfigDocument {
    /// Open `<dir>/<name>.yml`, creating an empty file if it does not exist.
    ///
    /// Fails with [`ConfigError::PermissionDenied`] when the file is absent
    /// and `dir` is not writable. A missing, empty or malformed file loads
    /// as an empty mapping.
    pub fn open(
        name: &str,
        dir: &Path,
        locks: Arc<LockTable>,
        stat: Arc<dyn StatSource>,
    ) -> Result<Self> {
        let path = document_path(name, dir);
        if !path.exists() {
            create_empty(&path)?;
            info!(name = %name, path = %path.display(), "Created configuration file");
        } else if !path.is_file() {
            return Err(ConfigError::io(
                &path,
                std::io::Error::new(ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let doc = Self {
            name: name.to_string(),
            path,
            detached: false,
            locks,
            stat,
            state: Mutex::new(DocState::default()),
        };
        {
            let mut state = doc.state.lock();
            doc.load_locked(&mut state);
        }
        Ok(doc)
    }

    /// In-memory document with no backing file. Writes always return false.
    pub fn detached(name: &str, locks: Arc<LockTable>, stat: Arc<dyn StatSource>) -> Self {
        Self {
            name: name.to_string(),
            path: PathBuf::from(format!("{name}.{CONFIG_EXTENSION}")),
            detached: true,
            locks,
            stat,
            state: Mutex::new(DocState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the backing YAML file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory containing the backing file.
    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Whether there are in-memory edits not yet written.
    pub fn is_pending(&self) -> bool {
        self.state.lock().pending_write
    }

    /// Stamp of the file as of the last load or write.
    pub fn loaded_stamp(&self) -> Option<FileStamp> {
        self.state.lock().loaded
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Current content, reloaded first if the file changed on disk.
    pub fn content(&self) -> Mapping {
        let mut state = self.state.lock();
        self.refresh_locked(&mut state);
        state.content.clone()
    }

    /// Value at a top-level key.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock();
        self.refresh_locked(&mut state);
        state.content.get(key).cloned()
    }

    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).unwrap_or(default)
    }

    /// Mapping at a top-level key, if that key holds a mapping.
    pub fn get_section(&self, key: &str) -> Option<Mapping> {
        match self.get(key) {
            Some(Value::Mapping(map)) => Some(map),
            _ => None,
        }
    }

    pub fn has_key(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        self.refresh_locked(&mut state);
        state.content.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        let mut state = self.state.lock();
        self.refresh_locked(&mut state);
        state.content.is_empty()
    }

    /// Reload if the file changed since it was loaded. Returns true if it did.
    ///
    /// A reload is skipped while unsaved edits exist; the next write will
    /// then report the conflict.
    pub fn check_reload(&self) -> bool {
        let mut state = self.state.lock();
        self.refresh_locked(&mut state)
    }

    /// Discard pending edits and re-read the file.
    pub fn reload(&self) {
        let mut state = self.state.lock();
        if state.pending_write {
            warn!(name = %self.name, "Discarding unsaved changes on reload");
        }
        self.load_locked(&mut state);
    }

    // ------------------------------------------------------------------
    // In-memory edits
    // ------------------------------------------------------------------

    /// Set a top-level key. Nothing is written until `write_changes`/`commit`.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.state.lock().record(Mutation::Set {
            key: key.to_string(),
            value: value.into(),
        });
    }

    /// Remove a top-level key, returning its previous value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        let mut state = self.state.lock();
        let previous = state.content.get(key).cloned();
        if previous.is_some() {
            state.record(Mutation::Remove(key.to_string()));
        }
        previous
    }

    /// Remove every occurrence of `keys` at any depth.
    pub fn remove_keys(&self, keys: &[&str]) {
        self.state.lock().record(Mutation::RemoveRecursive(
            keys.iter().map(|k| k.to_string()).collect(),
        ));
    }

    /// Deep merge `other` into the content.
    pub fn merge_with(&self, other: &Mapping) {
        self.state.lock().record(Mutation::Merge(other.clone()));
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write pending changes if the file on disk has not changed since it
    /// was loaded.
    ///
    /// Returns false when there was nothing to write, when another writer
    /// got there first, or when writing failed (the previous file is
    /// restored from the `.tmp` backup).
    pub fn write_changes(&self) -> bool {
        let mut state = self.state.lock();
        self.write_locked(&mut state) == WriteOutcome::Written
    }

    /// `write_changes`, reloading and replaying pending edits once on conflict.
    pub fn commit(&self) -> bool {
        self.apply_with_retry("commit", false, |_| Ok(())).unwrap_or(false)
    }

    /// Add `content` to the document and write it.
    ///
    /// Without `check_existing` the top-level keys of `content` replace the
    /// existing ones and the document is always written. With it the two
    /// are deep merged and the file is written only if something changed.
    pub fn populate(&self, content: &Mapping, check_existing: bool) -> bool {
        let mutation = if check_existing {
            Mutation::Merge(content.clone())
        } else {
            Mutation::Overlay(content.clone())
        };
        let written = self
            .apply_with_retry("populate", !check_existing, |c| {
                mutation.apply(c);
                Ok(())
            })
            .unwrap_or(false);
        if check_existing && !written && !self.is_pending() {
            warn!(name = %self.name, "populate: no change to write");
        }
        written
    }

    /// Prune and fill keys so the document matches `reference`.
    ///
    /// With `recursive` false only top-level keys are reconciled. Returns
    /// whether the file was written; an empty `reference` is an error.
    pub fn make_equal_by_keys(
        &self,
        reference: &Mapping,
        recursive: bool,
        depth: usize,
    ) -> Result<bool> {
        if reference.is_empty() {
            return Err(ConfigError::EmptyReference);
        }
        let depth = if recursive { depth } else { 0 };
        self.apply_with_retry("make_equal_by_keys", false, |c| {
            merge::make_equal_by_keys(c, reference, depth, 0)
        })
    }

    /// Add keys from `reference` that the document lacks and write.
    pub fn update_keys(&self, reference: &Mapping) -> bool {
        self.apply_with_retry("update_keys", false, |c| {
            merge::update_keys(c, reference);
            Ok(())
        })
        .unwrap_or(false)
    }

    /// Replace the backing file with the bytes of `source` and reload.
    pub fn import_file(&self, source: &Path) -> Result<()> {
        if self.detached {
            return Err(ConfigError::Detached(self.name.clone()));
        }
        let mut state = self.state.lock();
        {
            let _guard = self.locks.acquire(&self.path)?;
            let bytes = fs::read(source).map_err(|e| ConfigError::io(source, e))?;
            fs::write(&self.path, bytes).map_err(|e| ConfigError::io(&self.path, e))?;
        }
        info!(
            name = %self.name,
            from = %source.display(),
            "Imported configuration file"
        );
        self.load_locked(&mut state);
        Ok(())
    }

    /// Write the content as indented JSON next to the YAML file.
    pub fn export_to_json(&self) -> Result<PathBuf> {
        if self.detached {
            return Err(ConfigError::Detached(self.name.clone()));
        }
        let content = Value::Mapping(self.content());
        let json = serde_json::to_string_pretty(&content)?;
        let target = self.path.with_extension("json");
        fs::write(&target, json).map_err(|e| ConfigError::io(&target, e))?;
        debug!(name = %self.name, path = %target.display(), "Exported configuration");
        Ok(target)
    }

    // ------------------------------------------------------------------
    // Internals. Lock order: document state, then file lock.
    // ------------------------------------------------------------------

    fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn refresh_locked(&self, state: &mut DocState) -> bool {
        if self.detached {
            return false;
        }
        let on_disk = self.stat.stamp(&self.path);
        if on_disk == state.loaded {
            return false;
        }
        if state.pending_write {
            warn!(
                name = %self.name,
                "File changed on disk but unsaved changes exist; not reloading"
            );
            return false;
        }
        info!(name = %self.name, "File changed on disk, reloading");
        self.load_locked(state);
        true
    }

    fn load_locked(&self, state: &mut DocState) {
        state.pending_write = false;
        state.journal.clear();
        if self.detached {
            return;
        }
        let _guard = match self.locks.acquire(&self.path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                warn!(name = %self.name, "Reading without lock: {}", e);
                None
            }
        };
        state.loaded = self.stat.stamp(&self.path);
        state.content = read_document(&self.path);
        state.fingerprint = fingerprint(&state.content);
    }

    fn write_locked(&self, state: &mut DocState) -> WriteOutcome {
        if self.detached {
            warn!(name = %self.name, "Not writing detached document");
            return WriteOutcome::Failed;
        }
        let current = fingerprint(&state.content);
        if current.is_some() && current == state.fingerprint && !state.pending_write {
            return WriteOutcome::Unchanged;
        }

        let _guard = match self.locks.acquire(&self.path) {
            Ok(guard) => guard,
            Err(e) => {
                error!(name = %self.name, "Cannot write without lock: {}", e);
                return WriteOutcome::Failed;
            }
        };

        let on_disk = self.stat.stamp(&self.path);
        if on_disk != state.loaded {
            warn!(
                name = %self.name,
                path = %self.path.display(),
                "Disk contents are newer than this object; not writing"
            );
            return WriteOutcome::Conflict;
        }

        let backup = self.backup_path();
        if on_disk.is_some()
            && let Err(e) = fs::copy(&self.path, &backup)
        {
            error!(name = %self.name, "Failed to back up before write: {}", e);
            return WriteOutcome::Failed;
        }

        let written = serde_yaml::to_string(&state.content)
            .map_err(ConfigError::from)
            .and_then(|text| {
                state.injected_write_failure(&self.path)?;
                fs::write(&self.path, text).map_err(|e| ConfigError::io(&self.path, e))
            });

        match written {
            Ok(()) => {
                state.loaded = self.stat.stamp(&self.path);
                state.fingerprint = current;
                state.pending_write = false;
                state.journal.clear();
                if on_disk.is_some() {
                    let _ = fs::remove_file(&backup);
                }
                debug!(name = %self.name, "Wrote configuration");
                WriteOutcome::Written
            }
            Err(e) => {
                error!(name = %self.name, "Failed to write configuration: {}", e);
                if on_disk.is_some() {
                    match fs::rename(&backup, &self.path) {
                        // Same content as loaded; only the stamp moved.
                        Ok(()) => state.loaded = self.stat.stamp(&self.path),
                        Err(restore) => {
                            error!(name = %self.name, "Failed to restore backup: {}", restore)
                        }
                    }
                }
                WriteOutcome::Failed
            }
        }
    }

    /// Apply `op` under the file lock and write; on conflict reload, replay
    /// the journal, re-apply `op` and try once more.
    fn apply_with_retry<F>(&self, what: &str, force: bool, op: F) -> Result<bool>
    where
        F: Fn(&mut Mapping) -> Result<()>,
    {
        let mut state = self.state.lock();
        let _guard = if self.detached {
            None
        } else {
            match self.locks.acquire(&self.path) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    error!(name = %self.name, "{}: cannot lock: {}", what, e);
                    return Ok(false);
                }
            }
        };

        self.refresh_locked(&mut state);
        op(&mut state.content)?;
        if force {
            state.pending_write = true;
        }

        match self.write_locked(&mut state) {
            WriteOutcome::Written => return Ok(true),
            WriteOutcome::Unchanged => {
                debug!(name = %self.name, "{}: nothing changed", what);
                return Ok(false);
            }
            WriteOutcome::Failed => return Ok(false),
            WriteOutcome::Conflict => {
                warn!(name = %self.name, "{}: file changed on disk, reloading and retrying", what);
            }
        }

        let journal = std::mem::take(&mut state.journal);
        self.load_locked(&mut state);
        for mutation in journal {
            state.record(mutation);
        }
        op(&mut state.content)?;
        if force {
            state.pending_write = true;
        }

        match self.write_locked(&mut state) {
            WriteOutcome::Written => Ok(true),
            WriteOutcome::Unchanged => Ok(false),
            WriteOutcome::Conflict | WriteOutcome::Failed => {
                error!(name = %self.name, "{}: retry after reload failed", what);
                Ok(false)
            }
        }
    }
}

/// Path of the YAML file for `name` in `dir`.
pub fn document_path(name: &str, dir: &Path) -> PathBuf {
    dir.join(format!("{name}.{CONFIG_EXTENSION}"))
}

fn create_empty(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|e| ConfigError::io(dir, e))?;
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(e) => Err(ConfigError::io(path, e)),
    }
}

/// Parse a YAML file into a mapping. Anything unreadable becomes empty.
fn read_document(path: &Path) -> Mapping {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Configuration file missing");
            return Mapping::new();
        }
        Err(e) => {
            error!(path = %path.display(), "Failed to read configuration: {}", e);
            return Mapping::new();
        }
    };
    if text.trim().is_empty() {
        debug!(path = %path.display(), "Configuration file is empty");
        return Mapping::new();
    }
    match serde_yaml::from_str::<Value>(&text) {
        Ok(Value::Mapping(map)) => map,
        Ok(Value::Null) => Mapping::new(),
        Ok(_) => {
            error!(path = %path.display(), "Configuration is not a mapping; treating as empty");
            Mapping::new()
        }
        Err(e) => {
            error!(path = %path.display(), "Malformed configuration: {}", e);
            Mapping::new()
        }
    }
}

/// SHA-256 of the serialized content.
fn fingerprint(content: &Mapping) -> Option<String> {
    let text = serde_yaml::to_string(content).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}
