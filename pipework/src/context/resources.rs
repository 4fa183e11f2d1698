//! Thread-safe resource map shared across a pipeline run.

use crate::errors::ResourceError;
use parking_lot::RwLock;
use std::collections::HashMap;

/// A thread-safe key-value store for named resources.
///
/// Keys are unique at any instant: adding an existing key raises
/// `ResourceError::AlreadyExists` and reading or updating an absent key
/// raises `ResourceError::NotFound`. The `try_*` variants never fail.
#[derive(Debug, Default)]
pub struct ResourceBag {
    data: RwLock<HashMap<String, serde_json::Value>>,
}

impl ResourceBag {
    /// Creates a new empty resource bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a resource value.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NotFound` if the key is absent - asking for a
    /// resource that was never added is a contract violation.
    pub fn get(&self, key: &str) -> Result<serde_json::Value, ResourceError> {
        self.data
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| ResourceError::not_found(key))
    }

    /// Gets a resource value, returning `None` when absent.
    #[must_use]
    pub fn try_get(&self, key: &str) -> Option<serde_json::Value> {
        self.data.read().get(key).cloned()
    }

    /// Gets a resource value, falling back to a default when absent.
    #[must_use]
    pub fn try_get_or(&self, key: &str, default: serde_json::Value) -> serde_json::Value {
        self.try_get(key).unwrap_or(default)
    }

    /// Adds a resource.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::AlreadyExists` if the key is present.
    pub fn add(
        &self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Result<(), ResourceError> {
        let key = key.into();
        let mut data = self.data.write();

        if data.contains_key(&key) {
            return Err(ResourceError::already_exists(&key));
        }

        data.insert(key, value);
        Ok(())
    }

    /// Adds a resource, returning false instead of failing on a duplicate key.
    pub fn try_add(&self, key: impl Into<String>, value: serde_json::Value) -> bool {
        let key = key.into();
        let mut data = self.data.write();

        if data.contains_key(&key) {
            return false;
        }

        data.insert(key, value);
        true
    }

    /// Replaces an existing resource value.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::NotFound` if the key is absent.
    pub fn update(&self, key: &str, value: serde_json::Value) -> Result<(), ResourceError> {
        let mut data = self.data.write();

        match data.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ResourceError::not_found(key)),
        }
    }

    /// Removes a resource, returning false if the key was absent.
    pub fn remove(&self, key: &str) -> bool {
        self.data.write().remove(key).is_some()
    }

    /// Checks if a key exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.data.read().contains_key(key)
    }

    /// Returns a copy of all resources.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        self.data.read().clone()
    }

    /// Returns the number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Returns true if the bag is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Returns all keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.data.read().keys().cloned().collect()
    }
}

impl Clone for ResourceBag {
    fn clone(&self) -> Self {
        Self {
            data: RwLock::new(self.data.read().clone()),
        }
    }
}
