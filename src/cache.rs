use std::collections::HashMap;

use anyhow::Result;
use parking_lot::RwLock;

/// Session-scoped memo for resolved payloads. Entries are write-once per
/// key and live for the whole process session; failures are never stored,
/// so a later call can retry the resolver.
pub struct Cache<T: Clone> {
    entries: RwLock<HashMap<String, T>>,
}

impl<T: Clone> Cache<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.entries.read().get(key).cloned()
    }

    pub fn get_or_resolve<F>(&self, key: &str, resolve: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(hit) = self.entries.read().get(key) {
            return Ok(hit.clone());
        }
        let value = resolve()?;
        self.entries
            .write()
            .entry(key.to_string())
            .or_insert_with(|| value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<T: Clone> Default for Cache<T> {
    fn default() -> Self {
        Self::new()
    }
}
