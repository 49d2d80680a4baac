use std::collections::HashMap;

use parking_lot::RwLock;

/// Lifetime of a stored value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageScope {
    /// Tab-scoped; gone when the browser clears session storage.
    Session,
    /// Survives across tab-sessions for the same browser.
    Persistent,
}

/// Two-tier key-value storage reachable by the Event Client.
pub trait ScopedStorage: Send + Sync {
    fn get(&self, scope: StorageScope, key: &str) -> Option<String>;
    fn set(&self, scope: StorageScope, key: &str, value: String);
}

/// In-process storage for headless hosts and tests.
#[derive(Default)]
pub struct MemoryStorage {
    session: RwLock<HashMap<String, String>>,
    persistent: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the tab closing: drop every session-scoped value.
    pub fn clear_session(&self) {
        self.session.write().clear();
    }

    fn tier(&self, scope: StorageScope) -> &RwLock<HashMap<String, String>> {
        match scope {
            StorageScope::Session => &self.session,
            StorageScope::Persistent => &self.persistent,
        }
    }
}

impl ScopedStorage for MemoryStorage {
    fn get(&self, scope: StorageScope, key: &str) -> Option<String> {
        self.tier(scope).read().get(key).cloned()
    }

    fn set(&self, scope: StorageScope, key: &str, value: String) {
        self.tier(scope).write().insert(key.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_are_independent() {
        let store = MemoryStorage::new();
        store.set(StorageScope::Session, "k", "tab".into());
        store.set(StorageScope::Persistent, "k", "browser".into());
        assert_eq!(store.get(StorageScope::Session, "k").as_deref(), Some("tab"));
        assert_eq!(store.get(StorageScope::Persistent, "k").as_deref(), Some("browser"));

        store.clear_session();
        assert!(store.get(StorageScope::Session, "k").is_none());
        assert_eq!(store.get(StorageScope::Persistent, "k").as_deref(), Some("browser"));
    }
}
