//! Token Storage
//!
//! Key-value persistence for token sets. Keys are plain strings namespaced by
//! the caller; values are strings.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{AdapterError, AdapterResult, StorageError};

/// Token storage interface.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read one key.
    async fn get(&self, key: &str) -> AdapterResult<Option<String>>;

    /// Write one key.
    async fn set(&self, key: &str, value: &str) -> AdapterResult<()>;

    /// Delete one key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> AdapterResult<()>;

    /// Read every key starting with `prefix`.
    async fn get_prefix(&self, prefix: &str) -> AdapterResult<BTreeMap<String, String>>;

    /// Delete every key starting with `prefix`.
    async fn delete_prefix(&self, prefix: &str) -> AdapterResult<()>;

    /// Atomically replace every key starting with `prefix` by `entries`.
    ///
    /// Either all of `entries` become visible and every other key under
    /// `prefix` is gone, or the store is left untouched.
    async fn replace_prefix(
        &self,
        prefix: &str,
        entries: BTreeMap<String, String>,
    ) -> AdapterResult<()>;
}

/// In-memory token storage implementation.
#[derive(Default)]
pub struct InMemoryTokenStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryTokenStore {
    /// Create new in-memory token storage.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, key: &str) -> AdapterResult<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> AdapterResult<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> AdapterResult<()> {
        self.entries().remove(key);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> AdapterResult<BTreeMap<String, String>> {
        Ok(self
            .entries()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn delete_prefix(&self, prefix: &str) -> AdapterResult<()> {
        self.entries().retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    async fn replace_prefix(
        &self,
        prefix: &str,
        entries: BTreeMap<String, String>,
    ) -> AdapterResult<()> {
        let mut stored = self.entries();
        stored.retain(|k, _| !k.starts_with(prefix));
        stored.extend(entries);
        Ok(())
    }
}

/// Mock token storage for testing.
#[derive(Default)]
pub struct MockTokenStore {
    inner: InMemoryTokenStore,
    set_history: Mutex<Vec<(String, String)>>,
    delete_history: Mutex<Vec<String>>,
    should_fail: Mutex<bool>,
    writes: Mutex<usize>,
    fail_write_at: Mutex<Option<usize>>,
}

impl MockTokenStore {
    /// Create new mock storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail.
    pub fn set_should_fail(&self, should_fail: bool) -> &Self {
        *self.should_fail.lock().unwrap_or_else(|p| p.into_inner()) = should_fail;
        self
    }

    /// Make the `n`th write from now fail (1-based); other operations succeed.
    pub fn fail_on_write(&self, n: usize) -> &Self {
        *self.writes.lock().unwrap_or_else(|p| p.into_inner()) = 0;
        *self.fail_write_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(n);
        self
    }

    /// Current contents, bypassing failure injection.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.entries().clone()
    }

    /// Get write history.
    pub fn get_set_history(&self) -> Vec<(String, String)> {
        self.set_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Get delete history (single keys and prefixes).
    pub fn get_delete_history(&self) -> Vec<String> {
        self.delete_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn check(&self, error: impl FnOnce() -> StorageError) -> AdapterResult<()> {
        if *self.should_fail.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(AdapterError::Storage(error()));
        }
        Ok(())
    }

    fn check_write(&self, error: impl FnOnce() -> StorageError) -> AdapterResult<()> {
        let mut writes = self.writes.lock().unwrap_or_else(|p| p.into_inner());
        *writes += 1;
        let fail_at = *self.fail_write_at.lock().unwrap_or_else(|p| p.into_inner());
        if fail_at == Some(*writes) {
            return Err(AdapterError::Storage(error()));
        }
        drop(writes);
        self.check(error)
    }
}

fn failure(message: &str) -> String {
    format!("mock storage failure: {}", message)
}

#[async_trait]
impl TokenStore for MockTokenStore {
    async fn get(&self, key: &str) -> AdapterResult<Option<String>> {
        self.check(|| StorageError::ReadFailed {
            message: failure(key),
        })?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> AdapterResult<()> {
        self.check_write(|| StorageError::WriteFailed {
            message: failure(key),
        })?;
        self.set_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((key.to_string(), value.to_string()));
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> AdapterResult<()> {
        self.check(|| StorageError::DeleteFailed {
            message: failure(key),
        })?;
        self.delete_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(key.to_string());
        self.inner.delete(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> AdapterResult<BTreeMap<String, String>> {
        self.check(|| StorageError::ReadFailed {
            message: failure(prefix),
        })?;
        self.inner.get_prefix(prefix).await
    }

    async fn delete_prefix(&self, prefix: &str) -> AdapterResult<()> {
        self.check(|| StorageError::DeleteFailed {
            message: failure(prefix),
        })?;
        self.delete_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(prefix.to_string());
        self.inner.delete_prefix(prefix).await
    }

    async fn replace_prefix(
        &self,
        prefix: &str,
        entries: BTreeMap<String, String>,
    ) -> AdapterResult<()> {
        self.check_write(|| StorageError::WriteFailed {
            message: failure(prefix),
        })?;
        self.set_history
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.inner.replace_prefix(prefix, entries).await
    }
}

/// Create in-memory token storage.
pub fn create_in_memory_token_store() -> InMemoryTokenStore {
    InMemoryTokenStore::new()
}

/// Create mock token storage for testing.
pub fn create_mock_token_store() -> MockTokenStore {
    MockTokenStore::new()
}
