//! Configuration management for JustPost
//!
//! Configuration is a TOML file. Client secrets and the store encryption key
//! may also be supplied through the environment, which takes precedence:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:3000"
//! app_base_url = "http://localhost:5173/"
//!
//! [store]
//! path = "~/.local/share/justpost/secrets.db"
//! encryption_key = "AGE-SECRET-KEY-1..."
//!
//! [twitter]
//! client_id = "..."
//! client_secret = "..."
//! callback_uri = "http://localhost:3000/api/callback"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::error::{ConfigError, Result};
use crate::types::PlatformId;

pub const ENV_CONFIG: &str = "JUSTPOST_CONFIG";
pub const ENV_ENCRYPTION_KEY: &str = "JUSTPOST_ENCRYPTION_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub bluesky: BlueskyConfig,
    pub twitter: Option<TwitterConfig>,
    pub linkedin: Option<LinkedInConfig>,
    pub threads: Option<ThreadsConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Where the browser is sent after an OAuth callback.
    pub app_base_url: String,
    /// Request header carrying the authenticated user id.
    pub user_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:3000".to_string(),
            app_base_url: "http://localhost:3000/".to_string(),
            user_header: "x-user-id".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    /// age X25519 identity (`AGE-SECRET-KEY-1...`) used to seal stored values.
    #[serde(deserialize_with = "deserialize_optional_secret")]
    pub encryption_key: Option<SecretString>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/justpost/secrets.db".to_string(),
            encryption_key: None,
        }
    }
}

impl StoreConfig {
    /// Database path with `~` expanded.
    pub fn expanded_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).to_string())
    }

    pub fn require_encryption_key(&self) -> Result<&SecretString> {
        match &self.encryption_key {
            Some(key) if !key.expose_secret().trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingField("store.encryption_key".to_string()).into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout for calls to platform APIs, e.g. "30s".
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlueskyConfig {
    /// XRPC base URL of the account's PDS.
    pub service: String,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            service: "https://bsky.social/xrpc".to_string(),
        }
    }
}

/// Registered OAuth application credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClientConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "empty_secret", deserialize_with = "deserialize_secret")]
    pub client_secret: SecretString,
    #[serde(default)]
    pub callback_uri: String,
}

impl OAuthClientConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        callback_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: SecretString::from(client_secret.into()),
            callback_uri: callback_uri.into(),
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("{}.client_id", section)).into());
        }
        if self.client_secret.expose_secret().trim().is_empty() {
            return Err(ConfigError::MissingField(format!("{}.client_secret", section)).into());
        }
        if self.callback_uri.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("{}.callback_uri", section)).into());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwitterConfig {
    #[serde(flatten)]
    pub client: OAuthClientConfig,
    #[serde(default)]
    pub endpoints: TwitterEndpoints,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TwitterEndpoints {
    pub authorize: String,
    pub token: String,
    pub revoke: String,
    pub api: String,
}

impl Default for TwitterEndpoints {
    fn default() -> Self {
        Self {
            authorize: "https://x.com/i/oauth2/authorize".to_string(),
            token: "https://api.x.com/2/oauth2/token".to_string(),
            revoke: "https://api.x.com/2/oauth2/revoke".to_string(),
            api: "https://api.x.com/2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkedInConfig {
    #[serde(flatten)]
    pub client: OAuthClientConfig,
    #[serde(default)]
    pub endpoints: LinkedInEndpoints,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkedInEndpoints {
    pub authorize: String,
    pub token: String,
    pub revoke: String,
    pub api: String,
}

impl Default for LinkedInEndpoints {
    fn default() -> Self {
        Self {
            authorize: "https://www.linkedin.com/oauth/v2/authorization".to_string(),
            token: "https://www.linkedin.com/oauth/v2/accessToken".to_string(),
            revoke: "https://www.linkedin.com/oauth/v2/revoke".to_string(),
            api: "https://api.linkedin.com/v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadsConfig {
    #[serde(flatten)]
    pub client: OAuthClientConfig,
    #[serde(default)]
    pub endpoints: ThreadsEndpoints,
    /// Pause between creating a media container and publishing it.
    #[serde(
        default = "default_threads_publish_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub publish_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThreadsEndpoints {
    pub authorize: String,
    /// Graph API host; token, refresh and publish paths hang off it.
    pub graph: String,
}

impl Default for ThreadsEndpoints {
    fn default() -> Self {
        Self {
            authorize: "https://threads.net/oauth/authorize".to_string(),
            graph: "https://graph.threads.net".to_string(),
        }
    }
}

fn default_threads_publish_delay() -> Duration {
    Duration::from_secs(1)
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path, then apply environment overrides
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from TOML text without touching the environment
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Overlay secrets supplied through environment variables.
    pub fn apply_env_overrides(&mut self) {
        if let Some(key) = non_empty_env(ENV_ENCRYPTION_KEY) {
            self.store.encryption_key = Some(SecretString::from(key));
        }
        if let Some(twitter) = self.twitter.as_mut() {
            override_client_secret(&mut twitter.client, PlatformId::Twitter);
        }
        if let Some(linkedin) = self.linkedin.as_mut() {
            override_client_secret(&mut linkedin.client, PlatformId::LinkedIn);
        }
        if let Some(threads) = self.threads.as_mut() {
            override_client_secret(&mut threads.client, PlatformId::Threads);
        }
    }

    /// Check every field an operation could need, before anything touches the network.
    pub fn validate(&self) -> Result<()> {
        self.store.require_encryption_key()?;

        if self.server.app_base_url.trim().is_empty() {
            return Err(ConfigError::MissingField("server.app_base_url".to_string()).into());
        }
        if self.server.user_header.trim().is_empty() {
            return Err(ConfigError::MissingField("server.user_header".to_string()).into());
        }
        if self.http.timeout.is_zero() {
            return Err(ConfigError::InvalidValue("http.timeout".to_string()).into());
        }
        if let Some(twitter) = &self.twitter {
            twitter.client.validate("twitter")?;
        }
        if let Some(linkedin) = &self.linkedin {
            linkedin.client.validate("linkedin")?;
        }
        if let Some(threads) = &self.threads {
            threads.client.validate("threads")?;
        }
        Ok(())
    }

    /// Platforms usable with this configuration. BlueSky needs no app registration.
    pub fn configured_platforms(&self) -> Vec<PlatformId> {
        PlatformId::ALL
            .into_iter()
            .filter(|p| match p {
                PlatformId::Bluesky => true,
                PlatformId::Twitter => self.twitter.is_some(),
                PlatformId::LinkedIn => self.linkedin.is_some(),
                PlatformId::Threads => self.threads.is_some(),
            })
            .collect()
    }
}

/// Environment variable holding the client secret for `platform`.
pub fn client_secret_env_var(platform: PlatformId) -> String {
    format!(
        "JUSTPOST_{}_CLIENT_SECRET",
        platform.as_str().to_uppercase()
    )
}

fn override_client_secret(client: &mut OAuthClientConfig, platform: PlatformId) {
    if let Some(secret) = non_empty_env(&client_secret_env_var(platform)) {
        client.client_secret = SecretString::from(secret);
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("justpost").join("config.toml"))
}

fn empty_secret() -> SecretString {
    SecretString::from(String::new())
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn deserialize_secret<'de, D>(deserializer: D) -> std::result::Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn deserialize_optional_secret<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}
