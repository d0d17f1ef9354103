//! Platform connectors
//!
//! Every supported platform is reached through one [`Connector`]. A connector
//! owns the platform's login flow, its token refresh policy and its publish
//! call, and it is the only code that ever reads that platform's stored
//! credentials.
//!
//! Connector methods do not fail across their boundary for remote problems:
//! login, callback, verification and disconnect report a `bool`, and publish
//! reports a [`PostOutcome`]. Only [`Connector::start_login`] returns an
//! error, for problems detected before any network call.
//!
//! # Examples
//!
//! ```no_run
//! use libjustpost::platforms::{Connectors, LoginStart};
//! use libjustpost::store::SecretStore;
//! use libjustpost::types::PlatformId;
//! use libjustpost::Config;
//!
//! # async fn example() -> libjustpost::error::Result<()> {
//! let config = Config::load()?;
//! let connectors = Connectors::from_config(&config, SecretStore::in_memory())?;
//!
//! let twitter = connectors.get(PlatformId::Twitter)?;
//! if let LoginStart::AuthUrl(url) = twitter.start_login("user-1").await? {
//!     println!("Open {} to connect Twitter", url);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{ConfigError, PlatformError, Result};
use crate::store::SecretStore;
use crate::types::{BlueskyCredentials, PlatformId, PostOutcome};

pub mod bluesky;
pub mod http;
pub mod linkedin;
pub(crate) mod oauth;
pub mod threads;
pub mod twitter;

// Mock connector is available for all builds (not just tests) to support integration tests
pub mod mock;

/// What the caller must do next to log in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginStart {
    /// Send the user to this authorization URL.
    AuthUrl(String),
    /// Ask the user for credentials and pass them to [`Connector::submit_credentials`].
    CredentialsRequired,
}

/// Per-platform authentication and publishing
#[async_trait]
pub trait Connector: Send + Sync {
    fn platform(&self) -> PlatformId;

    /// Begin a login
    ///
    /// OAuth platforms persist a short-lived pending state and return the
    /// authorization URL. Credential platforms return
    /// [`LoginStart::CredentialsRequired`] without side effects.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a malformed endpoint, or a store
    /// error when the pending state could not be saved.
    async fn start_login(&self, user_id: &str) -> Result<LoginStart>;

    /// Exchange directly supplied credentials for a session
    ///
    /// Only meaningful for credential platforms; others always return `false`.
    /// Nothing is stored unless the exchange succeeds.
    async fn submit_credentials(&self, _user_id: &str, _credentials: &BlueskyCredentials) -> bool {
        tracing::warn!(platform = %self.platform(), "Platform does not accept direct credentials");
        false
    }

    /// Finish an OAuth round trip
    ///
    /// The pending state is consumed first, then `state` must match it
    /// exactly. Tokens are persisted only after the whole exchange succeeds.
    async fn complete_callback(&self, user_id: &str, code: &str, state: &str) -> bool;

    /// Abandon an in-flight login (for example when the provider reports an error)
    async fn cancel_login(&self, _user_id: &str) -> bool {
        true
    }

    /// Confirm stored credentials are usable, refreshing them if close to expiry
    ///
    /// Returns `true` without any network call while tokens are outside the
    /// platform's safety window. A failed refresh deletes the stored tokens.
    async fn verify_and_refresh(&self, user_id: &str) -> bool;

    /// Publish `text` as the user
    async fn publish(&self, user_id: &str, text: &str) -> PostOutcome;

    /// Revoke remotely where possible, then delete local credentials
    ///
    /// Returns `true` once local state is gone, whatever happened remotely.
    async fn disconnect(&self, user_id: &str) -> bool;

    /// Maximum post length in characters
    fn character_limit(&self) -> usize {
        self.platform().character_limit()
    }

    /// Validate content before posting
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Validation` for empty or over-limit content
    fn validate_content(&self, content: &str) -> std::result::Result<(), PlatformError> {
        validate_length(self.platform(), content, self.character_limit())
    }
}

pub(crate) fn validate_length(
    platform: PlatformId,
    content: &str,
    limit: usize,
) -> std::result::Result<(), PlatformError> {
    if content.trim().is_empty() {
        return Err(PlatformError::Validation("Content cannot be empty".to_string()));
    }

    let length = content.chars().count();
    if length > limit {
        return Err(PlatformError::Validation(format!(
            "{} posts are limited to {} characters (got {})",
            platform.display_name(),
            limit,
            length
        )));
    }

    Ok(())
}

/// Closed dispatch table from [`PlatformId`] to its connector.
#[derive(Clone, Default)]
pub struct Connectors {
    by_platform: BTreeMap<PlatformId, Arc<dyn Connector>>,
}

impl Connectors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a connector for every platform the configuration enables.
    pub fn from_config(config: &Config, store: SecretStore) -> Result<Self> {
        let client = http::build_client(config.http.timeout)?;
        let mut connectors = Self::new();

        connectors.insert(Arc::new(bluesky::BlueskyConnector::new(
            &config.bluesky,
            client.clone(),
            store.clone(),
        )));

        if let Some(twitter) = &config.twitter {
            connectors.insert(Arc::new(twitter::TwitterConnector::new(
                twitter,
                client.clone(),
                store.clone(),
            )));
        }

        if let Some(linkedin) = &config.linkedin {
            connectors.insert(Arc::new(linkedin::LinkedInConnector::new(
                linkedin,
                client.clone(),
                store.clone(),
            )));
        }

        if let Some(threads) = &config.threads {
            connectors.insert(Arc::new(threads::ThreadsConnector::new(
                threads, client, store,
            )));
        }

        Ok(connectors)
    }

    /// Register a connector, replacing any previous one for the same platform.
    pub fn insert(&mut self, connector: Arc<dyn Connector>) {
        self.by_platform.insert(connector.platform(), connector);
    }

    pub fn with(mut self, connector: Arc<dyn Connector>) -> Self {
        self.insert(connector);
        self
    }

    /// # Errors
    ///
    /// `ConfigError::PlatformNotConfigured` when the platform has no connector.
    pub fn get(&self, platform: PlatformId) -> Result<Arc<dyn Connector>> {
        self.by_platform
            .get(&platform)
            .cloned()
            .ok_or_else(|| ConfigError::PlatformNotConfigured(platform).into())
    }

    pub fn is_configured(&self, platform: PlatformId) -> bool {
        self.by_platform.contains_key(&platform)
    }

    pub fn platforms(&self) -> Vec<PlatformId> {
        self.by_platform.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockConnector;

    #[test]
    fn test_validate_length() {
        assert!(validate_length(PlatformId::Twitter, "hello", 280).is_ok());
        assert!(validate_length(PlatformId::Twitter, &"a".repeat(280), 280).is_ok());

        let err = validate_length(PlatformId::Twitter, &"a".repeat(281), 280).unwrap_err();
        assert!(err.to_string().contains("limited to 280 characters (got 281)"));

        assert!(validate_length(PlatformId::Twitter, "  \n", 280).is_err());
    }

    #[test]
    fn test_validate_length_counts_characters_not_bytes() {
        // 300 multi-byte characters fit BlueSky's limit
        let text = "é".repeat(300);
        assert!(validate_length(PlatformId::Bluesky, &text, 300).is_ok());
    }

    #[test]
    fn test_connectors_lookup() {
        let connectors = Connectors::new().with(Arc::new(MockConnector::success(PlatformId::Threads)));

        assert!(connectors.is_configured(PlatformId::Threads));
        assert!(connectors.get(PlatformId::Threads).is_ok());

        let err = connectors.get(PlatformId::Twitter).err().unwrap();
        assert!(err.is_configuration());
        assert_eq!(connectors.platforms(), vec![PlatformId::Threads]);
    }

    #[test]
    fn test_from_config_only_builds_configured_platforms() {
        let config = Config::from_toml(
            r#"
            [linkedin]
            client_id = "id"
            client_secret = "secret"
            callback_uri = "http://localhost:3000/api/callback"
            "#,
        )
        .unwrap();

        let connectors = Connectors::from_config(&config, SecretStore::in_memory()).unwrap();
        assert_eq!(
            connectors.platforms(),
            vec![PlatformId::Bluesky, PlatformId::LinkedIn]
        );
    }
}
