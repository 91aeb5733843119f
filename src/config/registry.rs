//! Registry of live configuration documents.
//!
//! The registry is owned by whoever composes the application and handed to
//! the resolvers. It keeps one shared [`ConfigDocument`] per `(name, path)`
//! for its whole lifetime and owns the lock table, so every document that
//! points at the same file also shares that file's lock.

use super::lock::LockTable;
use super::stamp::{DiskStat, StatSource};
use super::store::{ConfigDocument, document_path};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct ConfigRegistry {
    documents: Mutex<HashMap<String, Arc<ConfigDocument>>>,
    locks: Arc<LockTable>,
    stat: Arc<dyn StatSource>,
}

impl Default for ConfigRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigRegistry {
    /// Registry reading file stamps from disk.
    pub fn new() -> Self {
        Self::with_stat_source(Arc::new(DiskStat))
    }

    /// Registry with a custom stamp source.
    pub fn with_stat_source(stat: Arc<dyn StatSource>) -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            locks: Arc::new(LockTable::new()),
            stat,
        }
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// Open the document `name` in `dir`.
    ///
    /// An already registered document is reused after a staleness check.
    /// With `force_reload` a fresh, unregistered instance is returned; it
    /// shares the file lock with the registered one but not its content,
    /// so each must be reloaded to see writes made through the other.
    pub fn open(&self, name: &str, dir: &Path, force_reload: bool) -> Result<Arc<ConfigDocument>> {
        let key = identity(name, dir);

        if force_reload {
            debug!(name = %name, "Opening unregistered instance");
            return Ok(Arc::new(self.open_document(name, dir)?));
        }

        let mut documents = self.documents.lock();
        if let Some(doc) = documents.get(&key) {
            doc.check_reload();
            return Ok(Arc::clone(doc));
        }

        let doc = Arc::new(self.open_document(name, dir)?);
        documents.insert(key, Arc::clone(&doc));
        Ok(doc)
    }

    /// In-memory document for `name` that is never written. Not registered.
    pub fn detached(&self, name: &str) -> Arc<ConfigDocument> {
        Arc::new(ConfigDocument::detached(
            name,
            Arc::clone(&self.locks),
            Arc::clone(&self.stat),
        ))
    }

    /// Registered document for `name` in `dir`, without opening it.
    pub fn lookup(&self, name: &str, dir: &Path) -> Option<Arc<ConfigDocument>> {
        self.documents.lock().get(&identity(name, dir)).cloned()
    }

    /// Snapshot of every registered document.
    pub fn documents(&self) -> Vec<Arc<ConfigDocument>> {
        self.documents.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    fn open_document(&self, name: &str, dir: &Path) -> Result<ConfigDocument> {
        ConfigDocument::open(name, dir, Arc::clone(&self.locks), Arc::clone(&self.stat))
    }
}

fn identity(name: &str, dir: &Path) -> String {
    format!("{}:{}", name, document_path(name, dir).display())
}
