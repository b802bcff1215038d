//! Bearer-authenticated calls to downstream APIs
//!
//! What a controller does with a token once the handler produced one.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;

pub struct BearerClient {
    http: reqwest::Client,
}

impl BearerClient {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// GET `url` with `Authorization: Bearer {access_token}`.
    pub async fn get(&self, url: &str, access_token: &str) -> Result<reqwest::Response> {
        tracing::debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        check_response(resp, url).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, access_token: &str) -> Result<T> {
        let resp = self.get(url, access_token).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

impl Default for BearerClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. The access token was rejected by the downstream API.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
