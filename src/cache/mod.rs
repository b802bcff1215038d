//! Live token cache and its persistence hooks
//!
//! A [`TokenCache`] holds the accounts, access tokens and refresh tokens the
//! token handler works with during one operation. Persistence is delegated to
//! [`TokenCacheHooks`], which the cache calls before and after every access,
//! and before every write. The per-user provider in [`provider`] implements
//! those hooks on top of a [`store::CacheStore`].

pub mod provider;
pub mod store;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::auth::claims::Claims;
use crate::auth::StoredToken;

pub use provider::{CacheLockGuard, PerUserMemoryTokenCacheProvider, UserTokenCacheProvider};
pub use store::{CacheStore, MemoryCacheStore};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to serialize token cache: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("token cache blob is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// Cache key for a username. Azure AD usernames compare case-insensitively.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Signed-in account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl Account {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            tenant_id: None,
            object_id: None,
        }
    }

    /// Build the account from ID-token claims. `username` wins over the
    /// claimed name when given, so the cache key matches what the caller
    /// will later look up.
    pub fn from_claims(claims: Option<&Claims>, username: Option<&str>) -> Option<Self> {
        let name = username
            .filter(|u| !u.trim().is_empty())
            .or_else(|| claims.and_then(Claims::username))?;
        Some(Self {
            username: name.trim().to_string(),
            tenant_id: claims.and_then(|c| c.tid.clone()),
            object_id: claims.and_then(|c| c.oid.clone()),
        })
    }
}

/// Serializable contents of a token cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    #[serde(default)]
    accounts: BTreeMap<String, Account>,
    /// username -> token target -> access token
    #[serde(default)]
    access_tokens: BTreeMap<String, BTreeMap<String, StoredToken>>,
    #[serde(default)]
    refresh_tokens: BTreeMap<String, String>,
}

impl CacheState {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes).map_err(CacheError::Corrupt)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        serde_json::to_vec(self).map_err(CacheError::Serialize)
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.access_tokens.is_empty() && self.refresh_tokens.is_empty()
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn account(&self, username: &str) -> Option<&Account> {
        self.accounts.get(&normalize_username(username))
    }

    pub fn access_token(&self, username: &str, target: &str) -> Option<&StoredToken> {
        self.access_tokens
            .get(&normalize_username(username))
            .and_then(|tokens| tokens.get(target))
    }

    pub fn refresh_token(&self, username: &str) -> Option<&str> {
        self.refresh_tokens
            .get(&normalize_username(username))
            .map(String::as_str)
    }

    /// Record tokens for an account. A missing refresh token keeps the one
    /// already cached.
    pub fn upsert(
        &mut self,
        account: &Account,
        target: &str,
        token: StoredToken,
        refresh_token: Option<String>,
    ) {
        let key = normalize_username(&account.username);
        self.access_tokens
            .entry(key.clone())
            .or_default()
            .insert(target.to_string(), token);
        if let Some(rt) = refresh_token {
            self.refresh_tokens.insert(key.clone(), rt);
        }
        self.accounts.insert(key, account.clone());
    }

    pub fn remove_account(&mut self, username: &str) -> bool {
        let key = normalize_username(username);
        self.access_tokens.remove(&key);
        self.refresh_tokens.remove(&key);
        self.accounts.remove(&key).is_some()
    }
}

/// Arguments passed to every hook.
pub struct CacheNotification<'a> {
    pub state: &'a mut CacheState,
    /// Account the access was performed for, when known.
    pub account: Option<&'a Account>,
    pub has_state_changed: bool,
}

/// Callbacks a storage layer registers with a [`TokenCache`].
pub trait TokenCacheHooks: Send + Sync {
    fn before_access(&self, args: &mut CacheNotification<'_>) -> Result<(), CacheError>;

    fn after_access(&self, args: &mut CacheNotification<'_>) -> Result<(), CacheError>;

    fn before_write(&self, _args: &mut CacheNotification<'_>) -> Result<(), CacheError> {
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Phase {
    BeforeAccess,
    BeforeWrite,
    AfterAccess,
}

/// In-memory token cache for one handler operation.
#[derive(Default)]
pub struct TokenCache {
    state: CacheState,
    hooks: Option<Arc<dyn TokenCacheHooks>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the hooks. Replaces any hooks installed earlier.
    pub fn set_hooks(&mut self, hooks: Arc<dyn TokenCacheHooks>) {
        self.hooks = Some(hooks);
    }

    pub fn has_hooks(&self) -> bool {
        self.hooks.is_some()
    }

    /// Current contents, without triggering hooks.
    pub fn state(&self) -> &CacheState {
        &self.state
    }

    /// Read from the cache between the before-access and after-access hooks.
    pub fn read<R>(&mut self, f: impl FnOnce(&CacheState) -> R) -> Result<R, CacheError> {
        self.notify(Phase::BeforeAccess, None, false)?;
        let out = f(&self.state);
        self.notify(Phase::AfterAccess, None, false)?;
        Ok(out)
    }

    /// Mutate the cache. The after-access hook sees `has_state_changed` when
    /// `f` actually changed anything.
    pub fn write<R>(
        &mut self,
        account: Option<&Account>,
        f: impl FnOnce(&mut CacheState) -> R,
    ) -> Result<R, CacheError> {
        self.notify(Phase::BeforeAccess, account, false)?;
        self.notify(Phase::BeforeWrite, account, false)?;
        let before = self.state.clone();
        let out = f(&mut self.state);
        let changed = self.state != before;
        self.notify(Phase::AfterAccess, account, changed)?;
        Ok(out)
    }

    fn notify(
        &mut self,
        phase: Phase,
        account: Option<&Account>,
        has_state_changed: bool,
    ) -> Result<(), CacheError> {
        let Some(hooks) = self.hooks.clone() else {
            return Ok(());
        };
        let mut args = CacheNotification {
            state: &mut self.state,
            account,
            has_state_changed,
        };
        match phase {
            Phase::BeforeAccess => hooks.before_access(&mut args),
            Phase::BeforeWrite => hooks.before_write(&mut args),
            Phase::AfterAccess => hooks.after_access(&mut args),
        }
    }
}
