//! Key-value persistence consumed for credentials and the session token.
//!
//! The encrypted at-rest store is an external collaborator; the session
//! only needs put/get.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

pub(crate) const CREDENTIALS_KEY: &str = "session.credentials";
pub(crate) const TOKEN_KEY: &str = "session.token";

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreError(pub String);

pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

/// In-process store for tests and embedders without persistence.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }
}
