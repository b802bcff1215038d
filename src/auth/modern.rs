//! v2 endpoint grants (MSAL protocol)
//!
//! Code and refresh grants go through the `oauth2` client; the
//! on-behalf-of grant, which it does not model, is posted directly.

use async_trait::async_trait;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, ExtraTokenFields,
    RedirectUrl, RefreshToken, RequestTokenError, Scope, StandardRevocableToken,
    StandardTokenResponse, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::grant::{self, GrantFailure, JWT_BEARER_GRANT};
use super::handler::{AadTokenHandler, TokenGrants};
use super::{HandlerConfig, IssuedTokens, Protocol, TokenTarget};
use crate::cache::UserTokenCacheProvider;

/// Scopes added to every user grant so the response carries an ID token
/// and a refresh token.
const SIGN_IN_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// The v2 endpoint returns the ID token next to the access token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl ExtraTokenFields for IdTokenFields {}

type AadTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;

type AadClient = Client<
    BasicErrorResponse,
    AadTokenResponse,
    BasicTokenType,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
>;

pub type ModernTokenHandler = AadTokenHandler<ModernGrants>;

impl ModernTokenHandler {
    pub fn new(
        config: Arc<HandlerConfig>,
        cache: Arc<dyn UserTokenCacheProvider>,
        http: reqwest::Client,
    ) -> Self {
        let grants = ModernGrants {
            client: build_client(&config),
            config: config.clone(),
            http,
        };
        Self::with_grants(grants, config, cache)
    }
}

/// Build the OAuth2 client from the handler configuration
fn build_client(config: &HandlerConfig) -> AadClient {
    AadClient::new(
        ClientId::new(config.client_id.clone()),
        Some(ClientSecret::new(config.client_secret.clone())),
        AuthUrl::from_url(config.authority.authorize_endpoint().clone()),
        Some(TokenUrl::from_url(config.authority.token_endpoint().clone())),
    )
    // Azure AD expects the secret in the form body
    .set_auth_type(AuthType::RequestBody)
    .set_redirect_uri(RedirectUrl::from_url(config.redirect_uri.clone()))
}

fn user_scopes(target: &TokenTarget) -> Vec<String> {
    let mut scopes = target.scopes();
    for scope in SIGN_IN_SCOPES {
        if !scopes.iter().any(|s| s == scope) {
            scopes.push(scope.to_string());
        }
    }
    scopes
}

fn issued(response: AadTokenResponse) -> IssuedTokens {
    IssuedTokens {
        access_token: response.access_token().secret().to_string(),
        expires_in: response.expires_in().map(|d| d.as_secs()),
        refresh_token: response.refresh_token().map(|rt| rt.secret().to_string()),
        id_token: response.extra_fields().id_token.clone(),
    }
}

impl<RE> From<RequestTokenError<RE, BasicErrorResponse>> for GrantFailure
where
    RE: std::error::Error + 'static,
{
    fn from(err: RequestTokenError<RE, BasicErrorResponse>) -> Self {
        match err {
            RequestTokenError::ServerResponse(response) => GrantFailure::Rejected {
                error: response.error().to_string(),
                description: response.error_description().cloned().unwrap_or_default(),
            },
            RequestTokenError::Request(e) => {
                GrantFailure::Transport(format!("token request failed: {}", e))
            }
            RequestTokenError::Parse(e, _) => {
                GrantFailure::Transport(format!("malformed token response: {}", e))
            }
            RequestTokenError::Other(msg) => GrantFailure::Transport(msg),
        }
    }
}

pub struct ModernGrants {
    client: AadClient,
    config: Arc<HandlerConfig>,
    http: reqwest::Client,
}

#[async_trait]
impl TokenGrants for ModernGrants {
    fn protocol(&self) -> Protocol {
        Protocol::Modern
    }

    async fn redeem_code(
        &self,
        code: &str,
        target: &TokenTarget,
    ) -> Result<IssuedTokens, GrantFailure> {
        let response = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .add_extra_param("scope", user_scopes(target).join(" "))
            .request_async(async_http_client)
            .await?;
        Ok(issued(response))
    }

    async fn redeem_refresh_token(
        &self,
        refresh_token: &str,
        target: &TokenTarget,
    ) -> Result<IssuedTokens, GrantFailure> {
        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let mut request = self.client.exchange_refresh_token(&refresh_token);
        for scope in user_scopes(target) {
            request = request.add_scope(Scope::new(scope));
        }
        let response = request.request_async(async_http_client).await?;
        Ok(issued(response))
    }

    async fn on_behalf_of(
        &self,
        assertion: &str,
        target: &TokenTarget,
    ) -> Result<IssuedTokens, GrantFailure> {
        let scope = target.scopes().join(" ");
        grant::post_form(
            &self.http,
            self.config.authority.token_endpoint(),
            &[
                ("grant_type", JWT_BEARER_GRANT),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("assertion", assertion),
                ("requested_token_use", "on_behalf_of"),
                ("scope", scope.as_str()),
            ],
        )
        .await
    }
}
