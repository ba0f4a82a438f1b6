//! Side-channel store for large results that bypass the event stream.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

/// A keyed out-of-band cache.
///
/// Actions flagged `useFileContext` deliver their raw result here under
/// their `fileContextKey`; the matching `Success` event carries no payload.
pub trait FileContextStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    fn add(&self, key: &str, value: Value);
    /// Read a stored value.
    fn get(&self, key: &str) -> Option<Value>;
    /// Remove and return a stored value.
    fn remove(&self, key: &str) -> Option<Value>;
}

/// Process-local [`FileContextStore`].
#[derive(Debug, Default)]
pub struct InMemoryFileContextStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl InMemoryFileContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl FileContextStore for InMemoryFileContextStore {
    fn add(&self, key: &str, value: Value) {
        let _ = self.entries.write().insert(key.to_owned(), value);
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }
}

/// Deliver a result to the store if its request was registered.
///
/// `registration` is what the session held for the request id: `None` if
/// the request did not ask for file-context delivery, `Some(key)` if it did.
/// Returns whether the success payload must be suppressed.
pub(crate) fn deliver(
    store: &dyn FileContextStore,
    registration: Option<Option<String>>,
    result: &Value,
) -> bool {
    let Some(key) = registration else {
        return false;
    };
    if let Some(key) = key {
        debug!(key, "delivering result to file context");
        store.add(&key, result.clone());
    }
    true
}
