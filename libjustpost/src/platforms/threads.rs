//! Threads connector
//!
//! Login is a two-stage exchange: the authorization code buys a short-lived
//! token, which is immediately traded for a long-lived one. Only the
//! long-lived token is stored.
//!
//! Threads user ids are 64-bit integers that do not survive a round trip
//! through an `f64`, so ids are always read from the raw response text as
//! digit strings.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::{ThreadsConfig, ThreadsEndpoints};
use crate::error::{PlatformError, Result};
use crate::platforms::{http, oauth, Connector, LoginStart};
use crate::store::{SecretStore, StorePrefix};
use crate::types::{
    expires_at_from_now, is_outside_window, PlatformId, PostOutcome, StoredCredential,
    ThreadsTokens,
};

const SCOPES: &str = "threads_basic,threads_content_publish";
const PENDING_TTL: Duration = Duration::from_secs(300);
const SAFETY_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_EXPIRES_IN: i64 = 60 * 24 * 60 * 60;

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN
}

/// Threads appends `#_` to the code in the redirect.
pub fn clean_authorization_code(code: &str) -> &str {
    code.strip_suffix("#_").unwrap_or(code)
}

/// Read `field` from raw JSON as a string of digits, whether it was encoded
/// as a JSON number or a JSON string.
pub fn extract_id_field(raw: &str, field: &str) -> Option<String> {
    let needle = format!("\"{}\"", field);
    let mut search_from = 0;

    while let Some(found) = raw[search_from..].find(&needle) {
        let after_key = search_from + found + needle.len();
        let rest = raw[after_key..].trim_start();

        if let Some(value) = rest.strip_prefix(':') {
            let value = value.trim_start();
            let (value, quoted) = match value.strip_prefix('"') {
                Some(inner) => (inner, true),
                None => (value, false),
            };

            let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
            let terminated = !quoted || value[digits.len()..].starts_with('"');
            if !digits.is_empty() && terminated {
                return Some(digits);
            }
            return None;
        }

        search_from = after_key;
    }

    None
}

pub struct ThreadsConnector {
    client_id: String,
    client_secret: SecretString,
    callback_uri: String,
    endpoints: ThreadsEndpoints,
    publish_delay: Duration,
    client: reqwest::Client,
    store: SecretStore,
}

impl ThreadsConnector {
    pub fn new(config: &ThreadsConfig, client: reqwest::Client, store: SecretStore) -> Self {
        Self {
            client_id: config.client.client_id.clone(),
            client_secret: config.client.client_secret.clone(),
            callback_uri: config.client.callback_uri.clone(),
            endpoints: config.endpoints.clone(),
            publish_delay: config.publish_delay,
            client,
            store,
        }
    }

    fn graph(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.graph.trim_end_matches('/'), path)
    }

    async fn load_tokens(&self, user_id: &str) -> Option<ThreadsTokens> {
        match self
            .store
            .get::<StoredCredential>(StorePrefix::ThreadsTokens, user_id)
            .await?
        {
            StoredCredential::Threads(tokens) => Some(tokens),
            other => {
                tracing::warn!(found = %other.platform(), "Unexpected credential type under threads prefix");
                None
            }
        }
    }

    async fn save_tokens(&self, user_id: &str, tokens: ThreadsTokens) -> bool {
        self.store
            .set(
                StorePrefix::ThreadsTokens,
                user_id,
                &StoredCredential::Threads(tokens),
                None,
            )
            .await
    }

    /// Send a request and return the raw body of a successful response.
    async fn send_for_text(
        &self,
        request: reqwest::RequestBuilder,
        context: &str,
    ) -> std::result::Result<String, PlatformError> {
        let response = request
            .send()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Threads, context, e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(PlatformId::Threads, context, response).await);
        }

        response
            .text()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Threads, context, e))
    }

    fn parse_token(raw: &str, context: &str) -> std::result::Result<AccessToken, PlatformError> {
        serde_json::from_str(raw).map_err(|e| {
            tracing::warn!(context, error = %e, "Unreadable Threads token response");
            PlatformError::Remote(format!("Threads sent an unreadable response during {}", context))
        })
    }

    async fn exchange_code(&self, code: &str) -> std::result::Result<ThreadsTokens, PlatformError> {
        let code = clean_authorization_code(code);

        let raw = self
            .send_for_text(
                self.client.post(self.graph("oauth/access_token")).form(&[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.expose_secret()),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", self.callback_uri.as_str()),
                ]),
                "code exchange",
            )
            .await?;

        let user_id = extract_id_field(&raw, "user_id").ok_or_else(|| {
            PlatformError::Remote("Threads did not return a user id".to_string())
        })?;
        let short_lived = Self::parse_token(&raw, "code exchange")?;

        let raw = self
            .send_for_text(
                self.client.get(self.graph("access_token")).query(&[
                    ("grant_type", "th_exchange_token"),
                    ("client_secret", self.client_secret.expose_secret()),
                    ("access_token", short_lived.access_token.as_str()),
                ]),
                "long-lived token exchange",
            )
            .await?;
        let long_lived = Self::parse_token(&raw, "long-lived token exchange")?;

        Ok(ThreadsTokens {
            access_token: long_lived.access_token,
            user_id,
            expires_at: expires_at_from_now(long_lived.expires_in),
        })
    }

    async fn refresh(&self, current: &ThreadsTokens) -> std::result::Result<ThreadsTokens, PlatformError> {
        tracing::debug!("Refreshing Threads token");

        let raw = self
            .send_for_text(
                self.client.get(self.graph("refresh_access_token")).query(&[
                    ("grant_type", "th_refresh_token"),
                    ("access_token", current.access_token.as_str()),
                ]),
                "token refresh",
            )
            .await?;
        let refreshed = Self::parse_token(&raw, "token refresh")?;

        Ok(ThreadsTokens {
            access_token: refreshed.access_token,
            user_id: current.user_id.clone(),
            expires_at: expires_at_from_now(refreshed.expires_in),
        })
    }

    async fn create_post(
        &self,
        tokens: &ThreadsTokens,
        text: &str,
    ) -> std::result::Result<String, PlatformError> {
        let raw = self
            .send_for_text(
                self.client
                    .post(self.graph(&format!("v1.0/{}/threads", tokens.user_id)))
                    .query(&[
                        ("media_type", "TEXT"),
                        ("text", text),
                        ("access_token", tokens.access_token.as_str()),
                    ]),
                "post",
            )
            .await?;
        let creation_id = extract_id_field(&raw, "id").ok_or_else(|| {
            PlatformError::Posting("Threads did not return a container id".to_string())
        })?;

        // The container is not publishable the instant it is created
        if !self.publish_delay.is_zero() {
            tokio::time::sleep(self.publish_delay).await;
        }

        let raw = self
            .send_for_text(
                self.client
                    .post(self.graph(&format!("v1.0/{}/threads_publish", tokens.user_id)))
                    .query(&[
                        ("creation_id", creation_id.as_str()),
                        ("access_token", tokens.access_token.as_str()),
                    ]),
                "publish",
            )
            .await?;
        let post_id = extract_id_field(&raw, "id").ok_or_else(|| {
            PlatformError::Posting("Threads did not return a post id".to_string())
        })?;

        tracing::debug!(id = %post_id, "Posted to Threads");
        Ok(post_id)
    }
}

#[async_trait]
impl Connector for ThreadsConnector {
    fn platform(&self) -> PlatformId {
        PlatformId::Threads
    }

    async fn start_login(&self, user_id: &str) -> Result<LoginStart> {
        let pending = oauth::begin_pending(
            &self.store,
            StorePrefix::ThreadsCodes,
            user_id,
            PlatformId::Threads,
            None,
            PENDING_TTL,
        )
        .await?;

        let url = oauth::authorize_url(
            &self.endpoints.authorize,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.callback_uri.as_str()),
                ("scope", SCOPES),
                ("response_type", "code"),
                ("state", pending.state_token.as_str()),
            ],
        )?;

        Ok(LoginStart::AuthUrl(url))
    }

    async fn complete_callback(&self, user_id: &str, code: &str, state: &str) -> bool {
        if oauth::consume_pending(
            &self.store,
            StorePrefix::ThreadsCodes,
            user_id,
            PlatformId::Threads,
            state,
        )
        .await
        .is_err()
        {
            return false;
        }

        match self.exchange_code(code).await {
            Ok(tokens) => self.save_tokens(user_id, tokens).await,
            Err(e) => {
                tracing::info!(error = %e, "Threads token exchange failed");
                false
            }
        }
    }

    async fn cancel_login(&self, user_id: &str) -> bool {
        self.store.delete(StorePrefix::ThreadsCodes, user_id).await
    }

    async fn verify_and_refresh(&self, user_id: &str) -> bool {
        let Some(tokens) = self.load_tokens(user_id).await else {
            return false;
        };

        if is_outside_window(tokens.expires_at, SAFETY_WINDOW) {
            return true;
        }

        let refreshed = match self.refresh(&tokens).await {
            Ok(refreshed) => self.save_tokens(user_id, refreshed).await,
            Err(e) => {
                tracing::info!(error = %e, "Threads refresh failed");
                false
            }
        };
        if refreshed {
            return true;
        }

        tracing::info!("Threads token not refreshed, forgetting it");
        self.store.delete(StorePrefix::ThreadsTokens, user_id).await;
        false
    }

    async fn publish(&self, user_id: &str, text: &str) -> PostOutcome {
        if let Err(e) = self.validate_content(text) {
            return PostOutcome::failure(PlatformId::Threads, e.to_string());
        }

        if !self.verify_and_refresh(user_id).await {
            return PostOutcome::failure(
                PlatformId::Threads,
                PlatformError::NotConnected(PlatformId::Threads).to_string(),
            );
        }

        let Some(tokens) = self.load_tokens(user_id).await else {
            return PostOutcome::failure(
                PlatformId::Threads,
                PlatformError::NotConnected(PlatformId::Threads).to_string(),
            );
        };

        match self.create_post(&tokens, text).await {
            Ok(id) => PostOutcome::success(PlatformId::Threads, id),
            Err(e) => PostOutcome::failure(PlatformId::Threads, e.to_string()),
        }
    }

    async fn disconnect(&self, user_id: &str) -> bool {
        // Threads offers no token revocation endpoint
        self.store.delete(StorePrefix::ThreadsCodes, user_id).await;
        self.store.delete(StorePrefix::ThreadsTokens, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_authorization_code() {
        assert_eq!(clean_authorization_code("AQBx123#_"), "AQBx123");
        assert_eq!(clean_authorization_code("AQBx123"), "AQBx123");
    }

    #[test]
    fn test_extract_id_field_keeps_large_integers_exact() {
        let raw = r#"{"access_token":"THQVJ...","user_id":9007199254740993123}"#;
        assert_eq!(
            extract_id_field(raw, "user_id").as_deref(),
            Some("9007199254740993123")
        );

        // Through an f64 the same id comes out different
        assert_ne!(format!("{}", 9007199254740993123_f64 as u64), "9007199254740993123");
    }

    #[test]
    fn test_extract_id_field_whitespace_and_strings() {
        assert_eq!(
            extract_id_field(r#"{ "user_id" :  1234567890123456789 }"#, "user_id").as_deref(),
            Some("1234567890123456789")
        );
        assert_eq!(
            extract_id_field(r#"{"id":"17999999999999999"}"#, "id").as_deref(),
            Some("17999999999999999")
        );
    }

    #[test]
    fn test_extract_id_field_ignores_other_keys_and_values() {
        // "user_id" appearing as a value must not match
        assert_eq!(
            extract_id_field(r#"{"note":"user_id","user_id":42}"#, "user_id").as_deref(),
            Some("42")
        );
        // "id" must not match inside "user_id"
        assert_eq!(extract_id_field(r#"{"user_id":42}"#, "id"), None);
    }

    #[test]
    fn test_extract_id_field_rejects_non_numeric() {
        assert_eq!(extract_id_field(r#"{"user_id":null}"#, "user_id"), None);
        assert_eq!(extract_id_field(r#"{"user_id":"abc"}"#, "user_id"), None);
        assert_eq!(extract_id_field(r#"{"user_id":"12ab"}"#, "user_id"), None);
        assert_eq!(extract_id_field("", "user_id"), None);
    }
}
