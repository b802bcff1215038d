//! Authority URLs for the two Azure AD protocol versions

use std::fmt;
use url::Url;

/// Which Azure AD protocol the token handler speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// v1 endpoint: `resource` parameter, unsuffixed authority (ADAL)
    Legacy,
    /// v2 endpoint: `scope` parameter, `/v2.0` authority (MSAL)
    Modern,
}

impl Protocol {
    pub fn from_use_msal(use_msal: bool) -> Self {
        if use_msal {
            Protocol::Modern
        } else {
            Protocol::Legacy
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Legacy => write!(f, "v1 (ADAL)"),
            Protocol::Modern => write!(f, "v2 (MSAL)"),
        }
    }
}

/// Tenant-scoped authority, `{instance}{tenant}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    protocol: Protocol,
    base: Url,
    token_endpoint: Url,
    authorize_endpoint: Url,
}

impl Authority {
    pub fn new(protocol: Protocol, instance: &str, tenant: &str) -> Result<Self, url::ParseError> {
        let mut base = instance.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        base.push_str(tenant.trim().trim_matches('/'));
        base.push('/');
        let base = Url::parse(&base)?;

        let (token, authorize) = match protocol {
            Protocol::Legacy => ("oauth2/token", "oauth2/authorize"),
            Protocol::Modern => ("oauth2/v2.0/token", "oauth2/v2.0/authorize"),
        };

        Ok(Self {
            protocol,
            token_endpoint: base.join(token)?,
            authorize_endpoint: base.join(authorize)?,
            base,
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    pub fn authorize_endpoint(&self) -> &Url {
        &self.authorize_endpoint
    }

    /// Authority handed to the OpenID Connect middleware.
    pub fn oidc_authority(&self) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        match self.protocol {
            Protocol::Legacy => base.to_string(),
            Protocol::Modern => format!("{}/v2.0/", base),
        }
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base.as_str().trim_end_matches('/'))
    }
}
