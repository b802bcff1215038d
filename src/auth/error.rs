use thiserror::Error;

use crate::cache::CacheError;

#[derive(Debug, Error)]
pub enum TokenError {
    /// Nothing usable is cached for the user. Recover by sending the user
    /// through interactive sign-in.
    #[error("no cached token for '{username}'; interactive sign-in required")]
    NoCachedToken { username: String },

    #[error("authorization code exchange rejected ({code}): {description}")]
    CredentialExchange { code: String, description: String },

    #[error("on-behalf-of exchange rejected: {0}")]
    Delegation(String),

    #[error("token endpoint request failed: {0}")]
    Transport(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl TokenError {
    pub(crate) fn no_cached_token(username: &str) -> Self {
        TokenError::NoCachedToken {
            username: username.to_string(),
        }
    }

    /// True only for the cache miss, the one error callers handle by
    /// redirecting to sign-in rather than failing the request.
    pub fn requires_interaction(&self) -> bool {
        matches!(self, TokenError::NoCachedToken { .. })
    }
}
