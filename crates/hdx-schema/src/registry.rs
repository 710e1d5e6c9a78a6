//! Process-wide cache of parsed schema documents
//!
//! Keyed by (flavor, resolved location). Each entry is a write-once cell, so
//! concurrent callers missing on the same key block on one load instead of
//! parsing the document twice. Failed loads leave the cell empty and the next
//! caller retries.

use crate::model::Flavor;
use crate::resolution::SchemaLocation;
use crate::schema::Schema;
use crate::Result;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, trace};

type DocumentKey = (Flavor, SchemaLocation);
type DocumentCell = Arc<OnceCell<Arc<Schema>>>;

/// Thread-safe document cache shared between readers
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    documents: DashMap<DocumentKey, DocumentCell>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached document, or the result of `load` stored for later callers
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `load`; nothing is cached then.
    pub fn get_or_load<F>(
        &self,
        flavor: Flavor,
        location: &SchemaLocation,
        load: F,
    ) -> Result<Arc<Schema>>
    where
        F: FnOnce() -> Result<Schema>,
    {
        let key = (flavor, location.clone());
        // Clone the cell out so the shard lock is released before loading
        let cell = self
            .documents
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        if let Some(schema) = cell.get() {
            trace!("Cache hit for {} schema document {}", flavor, location);
            return Ok(Arc::clone(schema));
        }

        debug!("Cache miss for {} schema document {}", flavor, location);
        cell.get_or_try_init(|| load().map(Arc::new)).cloned()
    }

    /// Cached document without loading
    pub fn get(&self, flavor: Flavor, location: &SchemaLocation) -> Option<Arc<Schema>> {
        self.documents
            .get(&(flavor, location.clone()))
            .and_then(|cell| cell.get().cloned())
    }

    /// Store a parsed document, replacing any cached copy
    pub fn register(&self, flavor: Flavor, location: &SchemaLocation, schema: Schema) {
        let cell = OnceCell::new();
        let _ = cell.set(Arc::new(schema));
        self.documents
            .insert((flavor, location.clone()), Arc::new(cell));
    }

    /// Forget one cached document
    pub fn invalidate(&self, flavor: Flavor, location: &SchemaLocation) {
        self.documents.remove(&(flavor, location.clone()));
    }

    pub fn clear(&self) {
        self.documents.clear();
    }

    /// Number of documents loaded successfully
    pub fn len(&self) -> usize {
        self.documents
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
