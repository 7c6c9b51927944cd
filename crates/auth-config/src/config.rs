//! Configuration for the auth client.

use crate::{ConfigError, ConfigResult, Paths};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

/// Default auth server URL (can be overridden at compile time via AUTH_URL env var).
pub const DEFAULT_AUTH_URL: &str = match option_env!("AUTH_URL") {
    Some(url) => url,
    None => "http://localhost:9999",
};

/// Default storage key for the persisted session record.
pub const DEFAULT_STORAGE_KEY: &str = "supabase.auth.token";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// How redirect-based flows hand back credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthFlowType {
    /// Tokens arrive in the redirect URL fragment.
    Implicit,
    /// An authorization code arrives and is exchanged with a local verifier.
    #[default]
    Pkce,
}

impl std::str::FromStr for AuthFlowType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "implicit" => Ok(Self::Implicit),
            "pkce" => Ok(Self::Pkce),
            other => Err(ConfigError::Config(format!("Unknown flow type: {}", other))),
        }
    }
}

/// PKCE challenge derivation method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeChallengeMethod {
    #[default]
    S256,
    Plain,
}

impl CodeChallengeMethod {
    /// Method tag sent to the server.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "s256",
            Self::Plain => "plain",
        }
    }
}

/// Auth client configuration.
///
/// Built once and handed to each component at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the auth server, e.g. `https://xyz.supabase.co/auth/v1`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Publishable API key sent with every request.
    #[serde(default)]
    pub api_key: String,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Key of the persisted session record.
    #[serde(default = "default_storage_key")]
    pub storage_key: String,
    #[serde(default)]
    pub flow_type: AuthFlowType,
    #[serde(default)]
    pub code_challenge_method: CodeChallengeMethod,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            url: default_url(),
            api_key: String::new(),
            headers: BTreeMap::new(),
            storage_key: default_storage_key(),
            flow_type: AuthFlowType::default(),
            code_challenge_method: CodeChallengeMethod::default(),
        }
    }
}

impl Config {
    /// Create a config for a given server and key with everything else defaulted.
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the config file (if any), then apply
    /// environment overrides.
    pub fn load(paths: &Paths) -> ConfigResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> ConfigResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override fields from `AUTH_*` variables resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(url) = var("AUTH_URL") {
            self.url = url.trim().to_string();
        }
        if let Some(api_key) = var("AUTH_API_KEY") {
            self.api_key = api_key.trim().to_string();
        }
        if let Some(log_level) = var("AUTH_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(storage_key) = var("AUTH_STORAGE_KEY") {
            self.storage_key = storage_key;
        }
        if let Some(flow_type) = var("AUTH_FLOW_TYPE") {
            self.flow_type = flow_type.parse()?;
        }
        Ok(())
    }

    /// Check the fields every component relies on.
    pub fn validate(&self) -> ConfigResult<()> {
        let url = self.url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Config(format!(
                "Auth URL must be http(s), got {}",
                url.scheme()
            )));
        }
        if self.storage_key.trim().is_empty() {
            return Err(ConfigError::Config("Storage key must not be empty".to_string()));
        }
        Ok(())
    }

    /// Get the auth URL as a parsed URL, without a trailing slash.
    pub fn url(&self) -> ConfigResult<Url> {
        Url::parse(self.url.trim_end_matches('/')).map_err(ConfigError::from)
    }
}
