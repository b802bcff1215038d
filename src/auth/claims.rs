//! Unverified JWT claim decoding
//!
//! Token signatures are the identity provider's and the API host's concern.
//! This only reads the payload: account identity from ID tokens, audience and
//! expiry from inbound bearer tokens.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("token is not a compact JWT")]
    Malformed,
    #[error("token payload is not valid base64url: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("token payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// `aud` is either one string or a list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn values(&self) -> Vec<&str> {
        match self {
            Audience::One(aud) => vec![aud.as_str()],
            Audience::Many(auds) => auds.iter().map(String::as_str).collect(),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.trim_end_matches('/');
        self.values()
            .into_iter()
            .any(|aud| aud.trim_end_matches('/').eq_ignore_ascii_case(candidate))
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.values().join(", "))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub aud: Option<Audience>,
    #[serde(default)]
    pub exp: Option<u64>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub upn: Option<String>,
    #[serde(default)]
    pub unique_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub scp: Option<String>,
}

impl Claims {
    /// Username in the order v2 and v1 tokens carry it.
    pub fn username(&self) -> Option<&str> {
        [
            &self.preferred_username,
            &self.upn,
            &self.unique_name,
            &self.email,
        ]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .find(|name| !name.trim().is_empty())
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.exp.is_some_and(|exp| exp <= now)
    }
}

/// Decode the payload of a compact JWT without checking its signature.
pub fn decode_unverified(token: &str) -> Result<Claims, ClaimsError> {
    let mut parts = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ClaimsError::Malformed);
    };
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
pub(crate) fn fake_jwt(payload: &serde_json::Value) -> String {
    format!(
        "{}.{}.signature",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_v2_id_token() {
        let token = fake_jwt(&json!({
            "aud": "client-id",
            "preferred_username": "alice@contoso.com",
            "tid": "tenant",
            "oid": "object",
            "exp": 1_900_000_000u64
        }));
        let claims = decode_unverified(&token).unwrap();
        assert_eq!(claims.username(), Some("alice@contoso.com"));
        assert_eq!(claims.tid.as_deref(), Some("tenant"));
        assert_eq!(claims.aud, Some(Audience::One("client-id".into())));
        assert!(!claims.is_expired(1_800_000_000));
        assert!(claims.is_expired(1_900_000_000));
    }

    #[test]
    fn test_v1_username_fallbacks() {
        let claims = decode_unverified(&fake_jwt(&json!({ "upn": "bob@contoso.com" }))).unwrap();
        assert_eq!(claims.username(), Some("bob@contoso.com"));

        let claims = decode_unverified(&fake_jwt(&json!({
            "preferred_username": "",
            "unique_name": "carol@contoso.com"
        })))
        .unwrap();
        assert_eq!(claims.username(), Some("carol@contoso.com"));

        let claims = decode_unverified(&fake_jwt(&json!({}))).unwrap();
        assert_eq!(claims.username(), None);
    }

    #[test]
    fn test_audience_list_and_matching() {
        let claims = decode_unverified(&fake_jwt(&json!({
            "aud": ["api://my-api", "other"]
        })))
        .unwrap();
        let aud = claims.aud.unwrap();
        assert!(aud.matches("API://my-api/"));
        assert!(aud.matches("other"));
        assert!(!aud.matches("https://graph.microsoft.com"));
        assert_eq!(aud.to_string(), "api://my-api, other");
    }

    #[test]
    fn test_malformed_tokens() {
        assert!(matches!(decode_unverified("opaque-token"), Err(ClaimsError::Malformed)));
        assert!(matches!(decode_unverified("a.b.c.d.e"), Err(ClaimsError::Malformed)));
        assert!(matches!(decode_unverified("a.!!!.c"), Err(ClaimsError::Encoding(_))));
        let not_json = format!("a.{}.c", URL_SAFE_NO_PAD.encode("plain text"));
        assert!(matches!(decode_unverified(&not_json), Err(ClaimsError::Json(_))));
    }
}
