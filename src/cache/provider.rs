//! Per-user token cache provider
//!
//! Each signed-in user gets one blob in the backing store, keyed by their
//! normalized username. The provider binds a [`TokenCache`] to a user by
//! installing hooks that load the blob before every access and write it back
//! after every access that changed it.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::{
    normalize_username, CacheError, CacheNotification, CacheState, CacheStore, MemoryCacheStore,
    TokenCache, TokenCacheHooks,
};

#[async_trait]
pub trait UserTokenCacheProvider: Send + Sync {
    /// Bind `cache` to `username`. With no username the binding learns it
    /// from the first account written through the cache.
    fn initialize(&self, cache: &mut TokenCache, username: Option<&str>);

    /// Drop the cached tokens of `username`. Waits for any cycle holding
    /// the user's lock to finish first.
    async fn clear(&self, username: &str);

    /// Serialize read-modify-write cycles on one user's cache.
    async fn lock(&self, username: &str) -> CacheLockGuard;
}

type LockMap = DashMap<String, Arc<AsyncMutex<()>>>;

/// One async mutex per normalized username, created on demand.
///
/// An entry lives only while someone holds or waits for it.
#[derive(Default)]
pub struct UserLocks {
    locks: Arc<LockMap>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, username: &str) -> CacheLockGuard {
        let key = normalize_username(username);
        // Cloned under the shard lock, so eviction sees this holder
        let lock = self.locks.entry(key.clone()).or_default().clone();
        let guard = lock.lock_owned().await;
        CacheLockGuard {
            guard: Some(guard),
            locks: self.locks.clone(),
            key,
        }
    }

    /// Number of users with a live lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held for the duration of one load-mutate-write cycle on a user's cache.
pub struct CacheLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
    key: String,
}

impl Drop for CacheLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own reference left: nobody holds or waits
        self.locks.remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl fmt::Debug for CacheLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLockGuard").field("user", &self.key).finish()
    }
}

/// Provider backed by a [`CacheStore`], in memory by default.
pub struct PerUserMemoryTokenCacheProvider {
    store: Arc<dyn CacheStore>,
    locks: UserLocks,
}

impl PerUserMemoryTokenCacheProvider {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            locks: UserLocks::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn locks(&self) -> &UserLocks {
        &self.locks
    }
}

impl Default for PerUserMemoryTokenCacheProvider {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl UserTokenCacheProvider for PerUserMemoryTokenCacheProvider {
    fn initialize(&self, cache: &mut TokenCache, username: Option<&str>) {
        let binding = UserCacheBinding {
            store: self.store.clone(),
            signed_in_user: Mutex::new(
                username
                    .filter(|u| !u.trim().is_empty())
                    .map(normalize_username),
            ),
        };
        cache.set_hooks(Arc::new(binding));
    }

    async fn clear(&self, username: &str) {
        let _guard = self.locks.lock(username).await;
        let key = normalize_username(username);
        if self.store.remove(&key) {
            tracing::info!("Cleared token cache for {}", key);
        } else {
            tracing::debug!("No token cache to clear for {}", key);
        }
    }

    async fn lock(&self, username: &str) -> CacheLockGuard {
        self.locks.lock(username).await
    }
}

/// Hooks tying one live cache to one user's blob.
struct UserCacheBinding {
    store: Arc<dyn CacheStore>,
    signed_in_user: Mutex<Option<String>>,
}

impl UserCacheBinding {
    fn cache_key(&self) -> Option<String> {
        self.signed_in_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn learn_user(&self, args: &CacheNotification<'_>) {
        let mut user = self
            .signed_in_user
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if user.is_none() {
            if let Some(account) = args.account {
                *user = Some(normalize_username(&account.username));
            }
        }
    }
}

impl TokenCacheHooks for UserCacheBinding {
    fn before_access(&self, args: &mut CacheNotification<'_>) -> Result<(), CacheError> {
        // Unknown user: first sign-in, nothing to load yet
        let Some(key) = self.cache_key() else {
            return Ok(());
        };
        *args.state = match self.store.get(&key) {
            Some(bytes) => CacheState::from_bytes(&bytes)?,
            None => CacheState::default(),
        };
        Ok(())
    }

    fn after_access(&self, args: &mut CacheNotification<'_>) -> Result<(), CacheError> {
        self.learn_user(args);

        if !args.has_state_changed {
            return Ok(());
        }
        match self.cache_key() {
            Some(key) => {
                self.store.set(&key, args.state.to_bytes()?);
                tracing::debug!("Persisted token cache for {}", key);
            }
            None => {
                tracing::warn!("Token cache changed but no signed-in user is known; not persisted");
            }
        }
        Ok(())
    }

    // Locking happens around the whole cycle via `UserTokenCacheProvider::lock`.
    fn before_write(&self, _args: &mut CacheNotification<'_>) -> Result<(), CacheError> {
        Ok(())
    }
}
