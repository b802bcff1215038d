//! Azure AD token acquisition
//!
//! Redeems authorization codes, serves cached tokens silently and performs
//! on-behalf-of exchanges, against either the v1 (ADAL) or the v2 (MSAL)
//! endpoint. The protocol is fixed when the handler is built.

pub mod authority;
pub mod claims;
mod error;
pub mod grant;
pub mod handler;
pub mod legacy;
pub mod modern;
pub mod request;
pub mod tokens;

use std::fmt;
use std::sync::Arc;
use url::Url;

pub use authority::{Authority, Protocol};
pub use error::TokenError;
pub use handler::{AadTokenHandler, TokenHandler};
pub use legacy::LegacyTokenHandler;
pub use modern::ModernTokenHandler;
pub use request::{AuthorizationCodeRequest, OnBehalfOfRequest, SilentTokenRequest, TokenTarget};
pub use tokens::{IssuedTokens, StoredToken};

use crate::cache::UserTokenCacheProvider;
use claims::Audience;

/// Static client configuration shared by all token operations
#[derive(Clone)]
pub struct HandlerConfig {
    pub client_id: String,
    pub client_secret: String,
    /// Redirect URI registered for the code flow
    pub redirect_uri: Url,
    pub authority: Authority,
    /// What sign-in tokens are requested for
    pub target: TokenTarget,
    /// What on-behalf-of tokens are requested for
    pub downstream: TokenTarget,
    /// Extra audiences inbound tokens may carry, besides the client id
    pub audiences: Vec<String>,
}

impl HandlerConfig {
    /// Audiences an inbound bearer token may be issued for.
    pub fn accepted_audiences(&self) -> Vec<String> {
        let mut accepted = vec![
            self.client_id.clone(),
            format!("api://{}", self.client_id),
        ];
        accepted.extend(self.audiences.iter().cloned());
        accepted
    }

    pub fn accepts_audience(&self, aud: &Audience) -> bool {
        self.accepted_audiences()
            .iter()
            .any(|candidate| aud.matches(candidate))
    }
}

impl fmt::Debug for HandlerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("authority", &self.authority.to_string())
            .field("protocol", &self.authority.protocol())
            .field("target", &self.target)
            .field("downstream", &self.downstream)
            .field("audiences", &self.audiences)
            .finish()
    }
}

/// Build the token handler for the configured protocol.
pub fn build_token_handler(
    config: HandlerConfig,
    cache: Arc<dyn UserTokenCacheProvider>,
) -> Arc<dyn TokenHandler> {
    let protocol = config.authority.protocol();
    let config = Arc::new(config);
    let http = reqwest::Client::new();

    tracing::debug!("Using {} token handler against {}", protocol, config.authority);
    match protocol {
        Protocol::Legacy => Arc::new(LegacyTokenHandler::new(config, cache, http)),
        Protocol::Modern => Arc::new(ModernTokenHandler::new(config, cache, http)),
    }
}

#[cfg(test)]
pub(crate) fn test_config(protocol: Protocol, instance: &str) -> HandlerConfig {
    HandlerConfig {
        client_id: "11111111-2222-3333-4444-555555555555".into(),
        client_secret: "s3cret".into(),
        redirect_uri: Url::parse("https://localhost:44321/signin-oidc").unwrap(),
        authority: Authority::new(protocol, instance, "contoso.onmicrosoft.com").unwrap(),
        target: TokenTarget::resource("https://graph.microsoft.com"),
        downstream: TokenTarget::resource("https://graph.microsoft.com"),
        audiences: vec!["https://contoso.onmicrosoft.com/modern-auth-api".into()],
    }
}
