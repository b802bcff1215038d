//! Token handler: code redemption, silent lookup, on-behalf-of
//!
//! The cache and audience logic lives here once. The protocol backends in
//! [`super::legacy`] and [`super::modern`] only supply the grants.

use async_trait::async_trait;
use std::sync::Arc;

use super::claims::{self, Claims};
use super::grant::GrantFailure;
use super::tokens::now_secs;
use super::{
    AuthorizationCodeRequest, HandlerConfig, IssuedTokens, OnBehalfOfRequest, Protocol,
    SilentTokenRequest, TokenError, TokenTarget,
};
use crate::cache::{Account, TokenCache, UserTokenCacheProvider};

/// The three token operations, independent of protocol version.
#[async_trait]
pub trait TokenHandler: Send + Sync {
    /// Exchange an authorization code for tokens and cache them. Returns
    /// the account the tokens were cached under.
    async fn store_access_token(
        &self,
        request: AuthorizationCodeRequest,
    ) -> Result<Account, TokenError>;

    /// Return a cached access token, refreshing it if it expired.
    ///
    /// Fails with [`TokenError::NoCachedToken`] when the user has to sign in
    /// again.
    async fn get_access_token_silently(
        &self,
        request: SilentTokenRequest,
    ) -> Result<String, TokenError>;

    /// Exchange the caller's bearer token for a downstream token.
    async fn get_access_token_on_behalf_of(
        &self,
        request: OnBehalfOfRequest,
    ) -> Result<String, TokenError>;

    /// Drop everything cached for `username`, after any in-flight
    /// operation for that user has finished.
    async fn sign_out(&self, username: &str);
}

/// Protocol-specific grant calls.
#[async_trait]
pub trait TokenGrants: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn redeem_code(
        &self,
        code: &str,
        target: &TokenTarget,
    ) -> Result<IssuedTokens, GrantFailure>;

    async fn redeem_refresh_token(
        &self,
        refresh_token: &str,
        target: &TokenTarget,
    ) -> Result<IssuedTokens, GrantFailure>;

    async fn on_behalf_of(
        &self,
        assertion: &str,
        target: &TokenTarget,
    ) -> Result<IssuedTokens, GrantFailure>;
}

/// Token handler over a grant backend and a per-user cache.
pub struct AadTokenHandler<G> {
    grants: G,
    config: Arc<HandlerConfig>,
    cache: Arc<dyn UserTokenCacheProvider>,
}

impl<G: TokenGrants> AadTokenHandler<G> {
    pub fn with_grants(
        grants: G,
        config: Arc<HandlerConfig>,
        cache: Arc<dyn UserTokenCacheProvider>,
    ) -> Self {
        Self {
            grants,
            config,
            cache,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.grants.protocol()
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    fn check_inbound_token(&self, assertion: &str) -> Result<Claims, TokenError> {
        let claims = claims::decode_unverified(assertion)
            .map_err(|e| TokenError::Delegation(format!("inbound token unreadable: {}", e)))?;

        if claims.is_expired(now_secs()) {
            return Err(TokenError::Delegation("inbound token has expired".into()));
        }
        match &claims.aud {
            Some(aud) if self.config.accepts_audience(aud) => Ok(claims),
            Some(aud) => Err(TokenError::Delegation(format!(
                "inbound token audience '{}' is not accepted by this API",
                aud
            ))),
            None => Err(TokenError::Delegation("inbound token has no audience".into())),
        }
    }
}

#[async_trait]
impl<G: TokenGrants> TokenHandler for AadTokenHandler<G> {
    async fn store_access_token(
        &self,
        request: AuthorizationCodeRequest,
    ) -> Result<Account, TokenError> {
        let username = request.username.as_deref().filter(|u| !u.trim().is_empty());
        // First sign-in without a username runs unlocked; the key is learned afterwards
        let _guard = match username {
            Some(user) => Some(self.cache.lock(user).await),
            None => None,
        };

        let target = &self.config.target;
        let issued = self
            .grants
            .redeem_code(&request.code, target)
            .await
            .map_err(GrantFailure::into_credential_exchange)?;

        let id_claims = issued
            .id_token
            .as_deref()
            .and_then(|token| match claims::decode_unverified(token) {
                Ok(claims) => Some(claims),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable ID token: {}", e);
                    None
                }
            });
        let account = Account::from_claims(id_claims.as_ref(), username).ok_or_else(|| {
            TokenError::CredentialExchange {
                code: "missing_account".into(),
                description: "token response carried no ID token and no username was given".into(),
            }
        })?;

        let key = target.cache_key(self.protocol());
        let mut cache = TokenCache::new();
        self.cache.initialize(&mut cache, username);
        cache.write(Some(&account), |state| {
            state.upsert(&account, &key, issued.access(), issued.refresh_token.clone())
        })?;

        tracing::info!("Cached tokens for {} ({})", account.username, self.protocol());
        Ok(account)
    }

    async fn get_access_token_silently(
        &self,
        request: SilentTokenRequest,
    ) -> Result<String, TokenError> {
        let username = request.username.as_str();
        let target = request.target.as_ref().unwrap_or(&self.config.target);
        let key = target.cache_key(self.protocol());

        let _guard = self.cache.lock(username).await;
        let mut cache = TokenCache::new();
        self.cache.initialize(&mut cache, Some(username));

        let (account, cached, refresh_token) = cache.read(|state| {
            (
                state.account(username).cloned(),
                state.access_token(username, &key).cloned(),
                state.refresh_token(username).map(str::to_owned),
            )
        })?;

        let Some(account) = account else {
            tracing::debug!("No cached account for {}", username);
            return Err(TokenError::no_cached_token(username));
        };

        if let Some(token) = cached.filter(|t| !t.is_expired()) {
            tracing::debug!("Cache hit for {}", account.username);
            return Ok(token.token);
        }

        let Some(refresh_token) = refresh_token else {
            tracing::debug!("No refresh token cached for {}", account.username);
            return Err(TokenError::no_cached_token(username));
        };

        tracing::info!("Refreshing access token for {}", account.username);
        let issued = self
            .grants
            .redeem_refresh_token(&refresh_token, target)
            .await
            .map_err(|failure| failure.into_refresh_error(username))?;

        let token = issued.access();
        cache.write(Some(&account), |state| {
            state.upsert(&account, &key, token.clone(), issued.refresh_token.clone())
        })?;
        Ok(token.token)
    }

    async fn get_access_token_on_behalf_of(
        &self,
        request: OnBehalfOfRequest,
    ) -> Result<String, TokenError> {
        let claims = self.check_inbound_token(&request.assertion)?;
        let user = request
            .username
            .as_deref()
            .or_else(|| claims.username())
            .unwrap_or("(unknown user)");

        let target = request.target.as_ref().unwrap_or(&self.config.downstream);
        let issued = self
            .grants
            .on_behalf_of(&request.assertion, target)
            .await
            .map_err(|failure| {
                tracing::warn!("On-behalf-of exchange for {} failed: {:?}", user, failure);
                failure.into_delegation()
            })?;

        tracing::info!(
            "Acquired on-behalf-of token for {} to {}",
            user,
            target.resource_uri()
        );
        Ok(issued.access_token)
    }

    async fn sign_out(&self, username: &str) {
        self.cache.clear(username).await;
    }
}
