//! Backing stores for serialized token-cache blobs

use dashmap::DashMap;

/// Key-value store holding one opaque blob per signed-in user.
///
/// Implementations must tolerate concurrent calls from independent requests.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Vec<u8>>;
    fn set(&self, key: &str, value: Vec<u8>);
    /// Returns true if an entry was removed.
    fn remove(&self, key: &str) -> bool;
}

/// Process-local store. Entries live as long as the process.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<String, Vec<u8>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: &str, value: Vec<u8>) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryCacheStore::new();
        assert!(store.get("alice@contoso.com").is_none());

        store.set("alice@contoso.com", b"blob".to_vec());
        assert_eq!(store.get("alice@contoso.com").as_deref(), Some(&b"blob"[..]));
        assert_eq!(store.len(), 1);

        assert!(store.remove("alice@contoso.com"));
        assert!(!store.remove("alice@contoso.com"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_set_overwrites() {
        let store = MemoryCacheStore::new();
        store.set("bob", b"first".to_vec());
        store.set("bob", b"second".to_vec());
        assert_eq!(store.get("bob").as_deref(), Some(&b"second"[..]));
    }
}
