//! Per-operation token requests

use std::fmt;

use super::Protocol;

/// What a token is for: a v1 resource URI, and the v2 scopes for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTarget {
    resource: String,
    scopes: Vec<String>,
}

impl TokenTarget {
    pub fn resource(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.trim().is_empty())
            .collect();
        self
    }

    pub fn resource_uri(&self) -> &str {
        &self.resource
    }

    /// Explicit scopes, or `{resource}/.default`.
    pub fn scopes(&self) -> Vec<String> {
        if self.scopes.is_empty() {
            vec![format!("{}/.default", self.resource.trim_end_matches('/'))]
        } else {
            self.scopes.clone()
        }
    }

    /// Key the cached access token is filed under.
    pub fn cache_key(&self, protocol: Protocol) -> String {
        match protocol {
            Protocol::Legacy => self.resource.clone(),
            Protocol::Modern => self.scopes().join(" "),
        }
    }
}

/// Redeem an authorization code received at sign-in.
#[derive(Clone)]
pub struct AuthorizationCodeRequest {
    pub code: String,
    /// Signed-in username, when the caller already knows it
    pub username: Option<String>,
}

impl AuthorizationCodeRequest {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            username: None,
        }
    }

    pub fn for_user(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

impl fmt::Debug for AuthorizationCodeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationCodeRequest")
            .field("code", &"<redacted>")
            .field("username", &self.username)
            .finish()
    }
}

/// Look up a cached token for a signed-in user.
#[derive(Debug, Clone)]
pub struct SilentTokenRequest {
    pub username: String,
    /// Defaults to the sign-in target
    pub target: Option<TokenTarget>,
}

impl SilentTokenRequest {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            target: None,
        }
    }

    pub fn with_target(mut self, target: TokenTarget) -> Self {
        self.target = Some(target);
        self
    }
}

/// Exchange an inbound bearer token for a downstream one.
#[derive(Clone)]
pub struct OnBehalfOfRequest {
    pub assertion: String,
    pub username: Option<String>,
    /// Defaults to the configured downstream target
    pub target: Option<TokenTarget>,
}

impl OnBehalfOfRequest {
    pub fn new(assertion: impl Into<String>) -> Self {
        Self {
            assertion: assertion.into(),
            username: None,
            target: None,
        }
    }

    pub fn for_user(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_target(mut self, target: TokenTarget) -> Self {
        self.target = Some(target);
        self
    }
}

impl fmt::Debug for OnBehalfOfRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnBehalfOfRequest")
            .field("assertion", &"<redacted>")
            .field("username", &self.username)
            .field("target", &self.target)
            .finish()
    }
}
