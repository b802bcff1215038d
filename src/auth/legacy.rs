//! v1 endpoint grants (ADAL protocol)
//!
//! Tokens are requested per `resource`. The v1 endpoint reports
//! `expires_in` as a string, so all calls go through [`grant::post_form`].

use async_trait::async_trait;
use std::sync::Arc;

use super::grant::{self, GrantFailure, JWT_BEARER_GRANT};
use super::handler::{AadTokenHandler, TokenGrants};
use super::{HandlerConfig, IssuedTokens, Protocol, TokenTarget};
use crate::cache::UserTokenCacheProvider;

pub type LegacyTokenHandler = AadTokenHandler<LegacyGrants>;

impl LegacyTokenHandler {
    pub fn new(
        config: Arc<HandlerConfig>,
        cache: Arc<dyn UserTokenCacheProvider>,
        http: reqwest::Client,
    ) -> Self {
        let grants = LegacyGrants {
            config: config.clone(),
            http,
        };
        Self::with_grants(grants, config, cache)
    }
}

pub struct LegacyGrants {
    config: Arc<HandlerConfig>,
    http: reqwest::Client,
}

impl LegacyGrants {
    async fn post(&self, params: &[(&str, &str)]) -> Result<IssuedTokens, GrantFailure> {
        grant::post_form(&self.http, self.config.authority.token_endpoint(), params).await
    }
}

#[async_trait]
impl TokenGrants for LegacyGrants {
    fn protocol(&self) -> Protocol {
        Protocol::Legacy
    }

    async fn redeem_code(
        &self,
        code: &str,
        target: &TokenTarget,
    ) -> Result<IssuedTokens, GrantFailure> {
        let config = &self.config;
        self.post(&[
            ("grant_type", "authorization_code"),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("resource", target.resource_uri()),
        ])
        .await
    }

    async fn redeem_refresh_token(
        &self,
        refresh_token: &str,
        target: &TokenTarget,
    ) -> Result<IssuedTokens, GrantFailure> {
        let config = &self.config;
        self.post(&[
            ("grant_type", "refresh_token"),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("resource", target.resource_uri()),
        ])
        .await
    }

    async fn on_behalf_of(
        &self,
        assertion: &str,
        target: &TokenTarget,
    ) -> Result<IssuedTokens, GrantFailure> {
        let config = &self.config;
        self.post(&[
            ("grant_type", JWT_BEARER_GRANT),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("assertion", assertion),
            ("requested_token_use", "on_behalf_of"),
            ("resource", target.resource_uri()),
        ])
        .await
    }
}
