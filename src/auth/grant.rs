//! Raw token endpoint grants
//!
//! Used for everything the `oauth2` client does not model: the v1 endpoint,
//! which sends numeric fields as strings, and the on-behalf-of grant.

use serde::{Deserialize, Deserializer};
use url::Url;

use super::{IssuedTokens, TokenError};

pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Why a grant did not produce tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantFailure {
    /// The identity provider answered with an OAuth2 error body
    Rejected { error: String, description: String },
    /// No usable answer: network error, unexpected status or body
    Transport(String),
}

impl GrantFailure {
    pub fn into_credential_exchange(self) -> TokenError {
        match self {
            GrantFailure::Rejected { error, description } => TokenError::CredentialExchange {
                code: error,
                description,
            },
            GrantFailure::Transport(reason) => TokenError::Transport(reason),
        }
    }

    pub fn into_delegation(self) -> TokenError {
        match self {
            GrantFailure::Rejected { error, description } => {
                TokenError::Delegation(format!("{}: {}", error, description))
            }
            GrantFailure::Transport(reason) => TokenError::Transport(reason),
        }
    }

    /// A rejected refresh token means the user has to sign in again.
    pub fn into_refresh_error(self, username: &str) -> TokenError {
        match self {
            GrantFailure::Rejected { error, description } => {
                tracing::warn!(
                    "Refresh token for {} rejected ({}): {}",
                    username,
                    error,
                    description
                );
                TokenError::no_cached_token(username)
            }
            GrantFailure::Transport(reason) => TokenError::Transport(reason),
        }
    }
}

/// Successful token endpoint response, v1 or v2.
#[derive(Debug, Deserialize)]
pub struct TokenEndpointResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl From<TokenEndpointResponse> for IssuedTokens {
    fn from(response: TokenEndpointResponse) -> Self {
        IssuedTokens {
            access_token: response.access_token,
            expires_in: response.expires_in,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrString {
        Num(u64),
        Str(String),
    }

    Ok(match Option::<NumOrString>::deserialize(deserializer)? {
        Some(NumOrString::Num(n)) => Some(n),
        Some(NumOrString::Str(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// POST a form-encoded grant to the token endpoint.
pub async fn post_form(
    http: &reqwest::Client,
    endpoint: &Url,
    params: &[(&str, &str)],
) -> Result<IssuedTokens, GrantFailure> {
    let grant_type = params
        .iter()
        .find(|(name, _)| *name == "grant_type")
        .map(|(_, value)| *value)
        .unwrap_or("?");
    tracing::debug!("POST {} (grant_type={})", endpoint, grant_type);

    let resp = http
        .post(endpoint.clone())
        .form(params)
        .send()
        .await
        .map_err(|e| {
            GrantFailure::Transport(format!("token request to {} failed: {}", endpoint, e))
        })?;

    let status = resp.status();
    let body = resp
        .bytes()
        .await
        .map_err(|e| GrantFailure::Transport(format!("failed to read token response: {}", e)))?;

    if status.is_success() {
        let response: TokenEndpointResponse = serde_json::from_slice(&body)
            .map_err(|e| GrantFailure::Transport(format!("malformed token response: {}", e)))?;
        return Ok(response.into());
    }

    match serde_json::from_slice::<ErrorBody>(&body) {
        Ok(err) => Err(GrantFailure::Rejected {
            error: err.error,
            description: err.error_description.unwrap_or_default(),
        }),
        Err(_) => Err(GrantFailure::Transport(format!(
            "HTTP {} from token endpoint: {}",
            status.as_u16(),
            String::from_utf8_lossy(&body)
        ))),
    }
}
