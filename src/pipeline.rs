//! Sign-in pipeline wiring
//!
//! The web host owns the OpenID Connect and bearer middleware. This module
//! produces the options it needs and handles the two events that call into
//! the token handler: an authorization code arriving, and sign-in failing.

use std::sync::Arc;

use crate::auth::claims;
use crate::auth::{
    AuthorizationCodeRequest, HandlerConfig, Protocol, SilentTokenRequest, TokenError,
    TokenHandler,
};

/// Ask for both a code and an ID token at sign-in.
pub const RESPONSE_TYPE_CODE_ID_TOKEN: &str = "code id_token";

/// OpenID Connect middleware options for the interactive front-end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcOptions {
    pub client_id: String,
    pub authority: String,
    pub callback_path: String,
    pub response_type: &'static str,
    /// v1 only: resource requested during sign-in
    pub resource: Option<String>,
    /// Claim used as the user name
    pub name_claim_type: &'static str,
    pub use_token_lifetime: bool,
}

impl OidcOptions {
    pub fn configure(config: &HandlerConfig, callback_path: &str) -> Self {
        let (resource, name_claim_type) = match config.authority.protocol() {
            Protocol::Modern => (None, "preferred_username"),
            Protocol::Legacy => (Some(config.target.resource_uri().to_string()), "name"),
        };
        Self {
            client_id: config.client_id.clone(),
            authority: config.authority.oidc_authority(),
            callback_path: callback_path.to_string(),
            response_type: RESPONSE_TYPE_CODE_ID_TOKEN,
            resource,
            name_claim_type,
            use_token_lifetime: true,
        }
    }
}

/// Bearer-token validation options for the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JwtBearerOptions {
    pub authority: String,
    pub audiences: Vec<String>,
}

impl JwtBearerOptions {
    pub fn configure(config: &HandlerConfig) -> Self {
        Self {
            authority: config.authority.oidc_authority(),
            audiences: config.accepted_audiences(),
        }
    }
}

/// Authorization code delivered by the OpenID Connect middleware.
#[derive(Clone)]
pub struct AuthorizationCodeReceived {
    pub code: String,
    /// Name of the signed-in principal, if the middleware resolved one
    pub username: Option<String>,
    pub id_token: Option<String>,
}

/// What the middleware should do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Code redemption is done; hand these tokens back to the middleware.
    CodeRedeemed {
        id_token: Option<String>,
        access_token: Option<String>,
    },
    /// The response was produced here; stop processing.
    ResponseHandled,
}

pub struct AuthPipeline {
    handler: Arc<dyn TokenHandler>,
    redeem_silently: bool,
}

impl AuthPipeline {
    pub fn new(handler: Arc<dyn TokenHandler>) -> Self {
        Self {
            handler,
            redeem_silently: true,
        }
    }

    /// Whether to fetch the freshly cached access token after redeeming a code.
    pub fn redeem_silently(mut self, enabled: bool) -> Self {
        self.redeem_silently = enabled;
        self
    }

    pub async fn on_authorization_code_received(
        &self,
        event: AuthorizationCodeReceived,
    ) -> Result<PipelineOutcome, TokenError> {
        let username = event
            .username
            .filter(|u| !u.trim().is_empty())
            .or_else(|| {
                event
                    .id_token
                    .as_deref()
                    .and_then(|t| claims::decode_unverified(t).ok())
                    .and_then(|c| c.username().map(str::to_owned))
            });

        let mut request = AuthorizationCodeRequest::new(event.code);
        request.username = username.clone();
        let account = self.handler.store_access_token(request).await?;

        let access_token = if self.redeem_silently {
            // The handler may have learned the name from the token response
            let user = username.unwrap_or(account.username);
            Some(
                self.handler
                    .get_access_token_silently(SilentTokenRequest::new(user))
                    .await?,
            )
        } else {
            None
        };

        Ok(PipelineOutcome::CodeRedeemed {
            id_token: event.id_token,
            access_token,
        })
    }

    pub fn on_authentication_failed(&self, reason: &str) -> PipelineOutcome {
        tracing::warn!("Authentication failed: {}", reason);
        PipelineOutcome::ResponseHandled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::claims::fake_jwt;
    use crate::auth::{test_config, OnBehalfOfRequest};
    use crate::cache::Account;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandler {
        stored: Mutex<Vec<Option<String>>>,
        silent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TokenHandler for RecordingHandler {
        async fn store_access_token(
            &self,
            request: AuthorizationCodeRequest,
        ) -> Result<Account, TokenError> {
            if request.code == "expired" {
                return Err(TokenError::CredentialExchange {
                    code: "invalid_grant".into(),
                    description: "expired".into(),
                });
            }
            // Stands in for the name the token response carries
            let account = Account::new(
                request
                    .username
                    .clone()
                    .unwrap_or_else(|| "from-response@contoso.com".into()),
            );
            self.stored.lock().unwrap().push(request.username);
            Ok(account)
        }

        async fn get_access_token_silently(
            &self,
            request: SilentTokenRequest,
        ) -> Result<String, TokenError> {
            self.silent.lock().unwrap().push(request.username.clone());
            Ok(format!("token-for-{}", request.username))
        }

        async fn get_access_token_on_behalf_of(
            &self,
            _request: OnBehalfOfRequest,
        ) -> Result<String, TokenError> {
            unreachable!("pipeline never delegates")
        }

        async fn sign_out(&self, _username: &str) {}
    }

    #[test]
    fn test_oidc_options_per_protocol() {
        let modern = OidcOptions::configure(
            &test_config(Protocol::Modern, "https://login.microsoftonline.com/"),
            "/signin-oidc",
        );
        assert_eq!(
            modern.authority,
            "https://login.microsoftonline.com/contoso.onmicrosoft.com/v2.0/"
        );
        assert_eq!(modern.name_claim_type, "preferred_username");
        assert_eq!(modern.resource, None);
        assert_eq!(modern.response_type, "code id_token");

        let legacy = OidcOptions::configure(
            &test_config(Protocol::Legacy, "https://login.microsoftonline.com/"),
            "/signin-oidc",
        );
        assert_eq!(
            legacy.authority,
            "https://login.microsoftonline.com/contoso.onmicrosoft.com"
        );
        assert_eq!(legacy.resource.as_deref(), Some("https://graph.microsoft.com"));
    }

    #[test]
    fn test_bearer_options_accept_client_id() {
        let config = test_config(Protocol::Modern, "https://login.microsoftonline.com/");
        let options = JwtBearerOptions::configure(&config);
        assert!(options.audiences.contains(&config.client_id));
    }

    #[tokio::test]
    async fn test_code_received_stores_then_redeems_silently() {
        let handler = Arc::new(RecordingHandler::default());
        let pipeline = AuthPipeline::new(handler.clone());

        let outcome = pipeline
            .on_authorization_code_received(AuthorizationCodeReceived {
                code: "code".into(),
                username: Some("alice@contoso.com".into()),
                id_token: Some("id".into()),
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PipelineOutcome::CodeRedeemed {
                id_token: Some("id".into()),
                access_token: Some("token-for-alice@contoso.com".into()),
            }
        );
        assert_eq!(
            *handler.stored.lock().unwrap(),
            vec![Some("alice@contoso.com".to_string())]
        );
    }

    #[tokio::test]
    async fn test_username_falls_back_to_id_token() {
        let handler = Arc::new(RecordingHandler::default());
        let pipeline = AuthPipeline::new(handler.clone()).redeem_silently(false);
        let id_token = fake_jwt(&json!({ "preferred_username": "bob@contoso.com" }));

        let outcome = pipeline
            .on_authorization_code_received(AuthorizationCodeReceived {
                code: "code".into(),
                username: None,
                id_token: Some(id_token),
            })
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            PipelineOutcome::CodeRedeemed { access_token: None, .. }
        ));
        assert_eq!(
            *handler.stored.lock().unwrap(),
            vec![Some("bob@contoso.com".to_string())]
        );
        assert!(handler.silent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_username_learned_by_handler_completes_redeem() {
        let handler = Arc::new(RecordingHandler::default());
        let pipeline = AuthPipeline::new(handler.clone());

        let outcome = pipeline
            .on_authorization_code_received(AuthorizationCodeReceived {
                code: "code".into(),
                username: None,
                id_token: None,
            })
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PipelineOutcome::CodeRedeemed {
                id_token: None,
                access_token: Some("token-for-from-response@contoso.com".into()),
            }
        );
        assert_eq!(*handler.stored.lock().unwrap(), vec![None]);
    }

    #[tokio::test]
    async fn test_exchange_failure_propagates() {
        let pipeline = AuthPipeline::new(Arc::new(RecordingHandler::default()));
        let err = pipeline
            .on_authorization_code_received(AuthorizationCodeReceived {
                code: "expired".into(),
                username: Some("alice".into()),
                id_token: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TokenError::CredentialExchange { .. }));
    }

    #[test]
    fn test_authentication_failed_short_circuits() {
        let pipeline = AuthPipeline::new(Arc::new(RecordingHandler::default()));
        assert_eq!(
            pipeline.on_authentication_failed("AADSTS50011: reply url mismatch"),
            PipelineOutcome::ResponseHandled
        );
    }
}
