//! Application settings

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::auth::{Authority, HandlerConfig, Protocol, TokenTarget};

/// Environment variable that overrides `azure_ad.client_secret`
pub const CLIENT_SECRET_ENV: &str = "AZURE_AD_CLIENT_SECRET";

const DEFAULT_INSTANCE: &str = "https://login.microsoftonline.com/";
const DEFAULT_CALLBACK_PATH: &str = "/signin-oidc";

fn default_instance() -> String {
    DEFAULT_INSTANCE.to_string()
}

fn default_callback_path() -> String {
    DEFAULT_CALLBACK_PATH.to_string()
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Use the v2 (MSAL) protocol instead of v1 (ADAL)
    #[serde(default)]
    pub use_msal: bool,
    pub azure_ad: AzureAdSettings,
    /// Downstream API for on-behalf-of tokens; defaults to the sign-in resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downstream: Option<DownstreamSettings>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AzureAdSettings {
    #[serde(default = "default_instance")]
    pub instance: String,
    pub tenant_id: String,
    pub client_id: String,
    /// Usually left out of the file and supplied through the environment
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
    /// Resource sign-in tokens are requested for
    pub resource: String,
    /// v2 scopes; empty means `{resource}/.default`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Additional audiences accepted on inbound bearer tokens
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
}

impl AzureAdSettings {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            instance: default_instance(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: String::new(),
            redirect_uri: redirect_uri.into(),
            callback_path: default_callback_path(),
            resource: resource.into(),
            scopes: Vec::new(),
            audiences: Vec::new(),
        }
    }
}

impl fmt::Debug for AzureAdSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureAdSettings")
            .field("instance", &self.instance)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri)
            .field("callback_path", &self.callback_path)
            .field("resource", &self.resource)
            .field("scopes", &self.scopes)
            .field("audiences", &self.audiences)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamSettings {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

impl Settings {
    pub fn new(use_msal: bool, azure_ad: AzureAdSettings) -> Self {
        Self {
            use_msal,
            azure_ad,
            downstream: None,
        }
    }

    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "aad-token-handler", "aad-token-handler")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Default settings file path
    pub fn default_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("settings.toml"))
    }

    /// Load, apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            bail!(
                "Settings file {} not found. Create it or pass --config.",
                path.display()
            );
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let mut settings = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        settings.apply_env(|name| std::env::var(name).ok());
        settings.validate()?;

        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the environment; `lookup` is `std::env::var` outside tests.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(CLIENT_SECRET_ENV).filter(|s| !s.is_empty()) {
            self.azure_ad.client_secret = secret;
        }
    }

    /// Reject missing values up front instead of at the first token request.
    pub fn validate(&self) -> Result<()> {
        let ad = &self.azure_ad;
        let required = [
            ("azure_ad.instance", &ad.instance),
            ("azure_ad.tenant_id", &ad.tenant_id),
            ("azure_ad.client_id", &ad.client_id),
            ("azure_ad.client_secret", &ad.client_secret),
            ("azure_ad.redirect_uri", &ad.redirect_uri),
            ("azure_ad.resource", &ad.resource),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            bail!("Missing required settings: {}", missing.join(", "));
        }

        if let Some(downstream) = &self.downstream {
            if downstream.resource.trim().is_empty() {
                bail!("Missing required settings: downstream.resource");
            }
        }

        Url::parse(&ad.redirect_uri)
            .with_context(|| format!("azure_ad.redirect_uri is not a URL: {}", ad.redirect_uri))?;
        self.authority()?;
        Ok(())
    }

    pub fn protocol(&self) -> Protocol {
        Protocol::from_use_msal(self.use_msal)
    }

    pub fn authority(&self) -> Result<Authority> {
        Authority::new(self.protocol(), &self.azure_ad.instance, &self.azure_ad.tenant_id)
            .with_context(|| {
                format!(
                    "Invalid authority {}{}",
                    self.azure_ad.instance, self.azure_ad.tenant_id
                )
            })
    }

    pub fn sign_in_target(&self) -> TokenTarget {
        TokenTarget::resource(self.azure_ad.resource.clone())
            .with_scopes(self.azure_ad.scopes.iter().cloned())
    }

    pub fn downstream_target(&self) -> TokenTarget {
        match &self.downstream {
            Some(d) => {
                TokenTarget::resource(d.resource.clone()).with_scopes(d.scopes.iter().cloned())
            }
            None => self.sign_in_target(),
        }
    }

    pub fn handler_config(&self) -> Result<HandlerConfig> {
        let ad = &self.azure_ad;
        let redirect_uri = Url::parse(&ad.redirect_uri)
            .with_context(|| format!("azure_ad.redirect_uri is not a URL: {}", ad.redirect_uri))?;
        Ok(HandlerConfig {
            client_id: ad.client_id.clone(),
            client_secret: ad.client_secret.clone(),
            redirect_uri,
            authority: self.authority()?,
            target: self.sign_in_target(),
            downstream: self.downstream_target(),
            audiences: ad.audiences.clone(),
        })
    }

    /// Write a new settings file. An existing file is only replaced with `force`.
    pub fn init(&self, path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            bail!(
                "Settings file {} already exists. Pass --force to replace it.",
                path.display()
            );
        }
        self.save(path)?;
        tracing::info!("Wrote settings to {}", path.display());
        Ok(())
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, content).context("Failed to write settings file")?;

        // Set restrictive permissions on the file (contains the client secret)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set settings permissions")?;
        }

        Ok(())
    }
}
