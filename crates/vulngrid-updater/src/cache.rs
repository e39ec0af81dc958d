//! Executable cache: image ID → executable path → owning component IDs.
//!
//! Populated from image scans on the ingestion path and read by the updater
//! on every reconciliation cycle. Entries are tagged with the scanner
//! version that produced them; a different version replaces the entry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Executable index for one image.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageExecutables {
    /// Executable path → IDs of the components that install it.
    pub exec_to_components: HashMap<String, Vec<String>>,
    /// Scanner version the index was built from.
    pub scanner_version: String,
}

/// Shared, thread-safe executable cache.
///
/// Cloning is cheap and every clone sees the same entries. Readers never
/// block each other; inserts and evictions take the write lock.
#[derive(Debug, Clone, Default)]
pub struct ExecutableCache {
    entries: Arc<RwLock<HashMap<String, Arc<ImageExecutables>>>>,
}

impl ExecutableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the index for an image.
    pub fn get(&self, image_id: &str) -> Option<Arc<ImageExecutables>> {
        let entries = self.entries.read().expect("executable cache lock");
        entries.get(image_id).cloned()
    }

    /// Insert or replace the index for an image.
    pub fn put(&self, image_id: &str, executables: ImageExecutables) {
        let mut entries = self.entries.write().expect("executable cache lock");
        entries.insert(image_id.to_string(), Arc::new(executables));
    }

    /// Evict an image. Returns true if it was cached.
    pub fn remove(&self, image_id: &str) -> bool {
        let mut entries = self.entries.write().expect("executable cache lock");
        entries.remove(image_id).is_some()
    }

    /// Whether an image is cached.
    pub fn contains(&self, image_id: &str) -> bool {
        let entries = self.entries.read().expect("executable cache lock");
        entries.contains_key(image_id)
    }

    /// IDs of all cached images.
    pub fn keys(&self) -> Vec<String> {
        let entries = self.entries.read().expect("executable cache lock");
        entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().expect("executable cache lock");
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
