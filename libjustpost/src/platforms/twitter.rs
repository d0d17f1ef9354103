//! Twitter/X connector
//!
//! Confidential-client OAuth 2.0 with PKCE. The token, refresh and revoke
//! endpoints all take HTTP Basic auth with the client id and secret.
//!
//! Tokens are considered fresh until five minutes before expiry. Inside that
//! window a cheap `users/me` probe decides whether a refresh is needed.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use crate::config::{TwitterConfig, TwitterEndpoints};
use crate::error::{PlatformError, Result};
use crate::pkce::{generate_code_challenge, generate_code_verifier};
use crate::platforms::{http, oauth, Connector, LoginStart};
use crate::store::{SecretStore, StorePrefix};
use crate::types::{
    expires_at_from_now, is_outside_window, PlatformId, PostOutcome, StoredCredential,
    TwitterTokens,
};

const SCOPES: &str = "tweet.read tweet.write users.read offline.access";
const PENDING_TTL: Duration = Duration::from_secs(600);
const SAFETY_WINDOW: Duration = Duration::from_secs(5 * 60);
const DEFAULT_EXPIRES_IN: i64 = 7200;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    DEFAULT_EXPIRES_IN
}

#[derive(Deserialize)]
struct TweetResponse {
    data: TweetData,
}

#[derive(Deserialize)]
struct TweetData {
    id: String,
}

pub struct TwitterConnector {
    client_id: String,
    client_secret: SecretString,
    callback_uri: String,
    endpoints: TwitterEndpoints,
    client: reqwest::Client,
    store: SecretStore,
}

impl TwitterConnector {
    pub fn new(config: &TwitterConfig, client: reqwest::Client, store: SecretStore) -> Self {
        Self {
            client_id: config.client.client_id.clone(),
            client_secret: config.client.client_secret.clone(),
            callback_uri: config.client.callback_uri.clone(),
            endpoints: config.endpoints.clone(),
            client,
            store,
        }
    }

    async fn load_tokens(&self, user_id: &str) -> Option<TwitterTokens> {
        match self
            .store
            .get::<StoredCredential>(StorePrefix::TwitterTokens, user_id)
            .await?
        {
            StoredCredential::Twitter(tokens) => Some(tokens),
            other => {
                tracing::warn!(found = %other.platform(), "Unexpected credential type under twitter prefix");
                None
            }
        }
    }

    async fn save_tokens(&self, user_id: &str, tokens: &TwitterTokens) -> bool {
        self.store
            .set(
                StorePrefix::TwitterTokens,
                user_id,
                &StoredCredential::Twitter(tokens.clone()),
                None,
            )
            .await
    }

    async fn token_request(
        &self,
        context: &str,
        form: &[(&str, &str)],
    ) -> std::result::Result<TokenResponse, PlatformError> {
        let response = self
            .client
            .post(&self.endpoints.token)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(form)
            .send()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Twitter, context, e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(PlatformId::Twitter, context, response).await);
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Twitter, context, e))
    }

    /// Exchange the refresh token; the new set is persisted before returning,
    /// and a set that cannot be persisted fails the refresh.
    async fn refresh(
        &self,
        user_id: &str,
        current: &TwitterTokens,
    ) -> std::result::Result<TwitterTokens, PlatformError> {
        tracing::debug!("Refreshing Twitter tokens");

        let response = self
            .token_request(
                "token refresh",
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", current.refresh_token.as_str()),
                    ("client_id", self.client_id.as_str()),
                ],
            )
            .await?;

        let tokens = TwitterTokens {
            access_token: response.access_token,
            // Twitter rotates refresh tokens; keep the old one if none came back
            refresh_token: response
                .refresh_token
                .unwrap_or_else(|| current.refresh_token.clone()),
            expires_at: expires_at_from_now(response.expires_in),
        };

        // The old refresh token may already be rotated out, so an unsaved
        // pair leaves nothing usable behind.
        if !self.save_tokens(user_id, &tokens).await {
            tracing::error!("Refreshed Twitter tokens could not be saved");
            return Err(PlatformError::Authentication(
                "refreshed tokens could not be saved".to_string(),
            ));
        }

        Ok(tokens)
    }

    async fn probe(&self, access_token: &str) -> bool {
        let result = self
            .client
            .get(format!("{}/users/me", self.endpoints.api))
            .bearer_auth(access_token)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Twitter probe failed");
                false
            }
        }
    }

    async fn post_tweet(&self, access_token: &str, text: &str) -> std::result::Result<String, PlatformError> {
        let response = self
            .client
            .post(format!("{}/tweets", self.endpoints.api))
            .bearer_auth(access_token)
            .json(&json!({ "text": text }))
            .send()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Twitter, "post", e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(PlatformId::Twitter, "post", response).await);
        }

        let tweet = response
            .json::<TweetResponse>()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Twitter, "post", e))?;

        tracing::debug!(id = %tweet.data.id, "Posted to Twitter");
        Ok(tweet.data.id)
    }

    async fn revoke(&self, token: &str, hint: &str) -> std::result::Result<(), PlatformError> {
        let response = self
            .client
            .post(&self.endpoints.revoke)
            .basic_auth(&self.client_id, Some(self.client_secret.expose_secret()))
            .form(&[
                ("token", token),
                ("token_type_hint", hint),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| http::map_request_error(PlatformId::Twitter, "revoke", e))?;

        if !response.status().is_success() {
            return Err(http::error_from_response(PlatformId::Twitter, "revoke", response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for TwitterConnector {
    fn platform(&self) -> PlatformId {
        PlatformId::Twitter
    }

    async fn start_login(&self, user_id: &str) -> Result<LoginStart> {
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);

        let pending = oauth::begin_pending(
            &self.store,
            StorePrefix::TwitterPkce,
            user_id,
            PlatformId::Twitter,
            Some(verifier),
            PENDING_TTL,
        )
        .await?;

        let url = oauth::authorize_url(
            &self.endpoints.authorize,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.callback_uri.as_str()),
                ("scope", SCOPES),
                ("state", pending.state_token.as_str()),
                ("code_challenge", challenge.as_str()),
                ("code_challenge_method", "S256"),
            ],
        )?;

        Ok(LoginStart::AuthUrl(url))
    }

    async fn complete_callback(&self, user_id: &str, code: &str, state: &str) -> bool {
        let pending = match oauth::consume_pending(
            &self.store,
            StorePrefix::TwitterPkce,
            user_id,
            PlatformId::Twitter,
            state,
        )
        .await
        {
            Ok(pending) => pending,
            Err(_) => return false,
        };

        let Some(verifier) = pending.code_verifier.as_deref() else {
            tracing::warn!("Twitter pending state has no code verifier");
            return false;
        };

        let response = match self
            .token_request(
                "code exchange",
                &[
                    ("code", code),
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", self.callback_uri.as_str()),
                    ("code_verifier", verifier),
                    ("client_id", self.client_id.as_str()),
                ],
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::info!(error = %e, "Twitter code exchange failed");
                return false;
            }
        };

        let Some(refresh_token) = response.refresh_token else {
            tracing::warn!("Twitter token response has no refresh token");
            return false;
        };

        let tokens = TwitterTokens {
            access_token: response.access_token,
            refresh_token,
            expires_at: expires_at_from_now(response.expires_in),
        };

        self.save_tokens(user_id, &tokens).await
    }

    async fn cancel_login(&self, user_id: &str) -> bool {
        self.store.delete(StorePrefix::TwitterPkce, user_id).await
    }

    async fn verify_and_refresh(&self, user_id: &str) -> bool {
        let Some(tokens) = self.load_tokens(user_id).await else {
            return false;
        };

        if is_outside_window(tokens.expires_at, SAFETY_WINDOW) {
            return true;
        }

        if self.probe(&tokens.access_token).await {
            return true;
        }

        match self.refresh(user_id, &tokens).await {
            Ok(_) => true,
            Err(e) => {
                tracing::info!(error = %e, "Twitter refresh failed, forgetting tokens");
                self.store.delete(StorePrefix::TwitterTokens, user_id).await;
                false
            }
        }
    }

    async fn publish(&self, user_id: &str, text: &str) -> PostOutcome {
        if let Err(e) = self.validate_content(text) {
            return PostOutcome::failure(PlatformId::Twitter, e.to_string());
        }

        if !self.verify_and_refresh(user_id).await {
            return PostOutcome::failure(
                PlatformId::Twitter,
                PlatformError::NotConnected(PlatformId::Twitter).to_string(),
            );
        }

        let Some(tokens) = self.load_tokens(user_id).await else {
            return PostOutcome::failure(
                PlatformId::Twitter,
                PlatformError::NotConnected(PlatformId::Twitter).to_string(),
            );
        };

        match self.post_tweet(&tokens.access_token, text).await {
            Ok(id) => PostOutcome::success(PlatformId::Twitter, id),
            Err(e) if e.is_authentication() => {
                // Revoked between verification and posting: refresh once and retry.
                let refreshed = match self.refresh(user_id, &tokens).await {
                    Ok(refreshed) => refreshed,
                    Err(refresh_error) => {
                        tracing::info!(error = %refresh_error, "Twitter refresh after 401 failed");
                        self.store.delete(StorePrefix::TwitterTokens, user_id).await;
                        return PostOutcome::failure(PlatformId::Twitter, e.to_string());
                    }
                };

                match self.post_tweet(&refreshed.access_token, text).await {
                    Ok(id) => PostOutcome::success(PlatformId::Twitter, id),
                    Err(e) => PostOutcome::failure(PlatformId::Twitter, e.to_string()),
                }
            }
            Err(e) => PostOutcome::failure(PlatformId::Twitter, e.to_string()),
        }
    }

    async fn disconnect(&self, user_id: &str) -> bool {
        if let Some(tokens) = self.load_tokens(user_id).await {
            let (access, refresh) = futures::join!(
                self.revoke(&tokens.access_token, "access_token"),
                self.revoke(&tokens.refresh_token, "refresh_token"),
            );
            if let Err(e) = access {
                tracing::warn!(error = %e, "Twitter access token revocation failed");
            }
            if let Err(e) = refresh {
                tracing::warn!(error = %e, "Twitter refresh token revocation failed");
            }
        }

        self.store.delete(StorePrefix::TwitterPkce, user_id).await;
        self.store.delete(StorePrefix::TwitterTokens, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OAuthClientConfig;
    use crate::pkce::decode_state_token;
    use crate::types::PendingAuthState;

    fn connector(store: SecretStore) -> TwitterConnector {
        let config = TwitterConfig {
            client: OAuthClientConfig::new("tw-client", "tw-secret", "http://localhost:3000/api/callback"),
            endpoints: TwitterEndpoints::default(),
        };
        let client = http::build_client(Duration::from_secs(1)).unwrap();
        TwitterConnector::new(&config, client, store)
    }

    #[tokio::test]
    async fn test_start_login_builds_pkce_url_and_stores_pending() {
        let store = SecretStore::in_memory();
        let connector = connector(store.clone());

        let LoginStart::AuthUrl(url) = connector.start_login("u1").await.unwrap() else {
            panic!("expected an authorization URL");
        };

        let url = reqwest::Url::parse(&url).unwrap();
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.host_str(), Some("x.com"));
        assert_eq!(params["client_id"], "tw-client");
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["scope"], SCOPES);
        assert_eq!(params["code_challenge_method"], "S256");
        assert_eq!(params["redirect_uri"], "http://localhost:3000/api/callback");

        let pending: PendingAuthState = store.get(StorePrefix::TwitterPkce, "u1").await.unwrap();
        assert_eq!(params["state"], pending.state_token);
        assert_eq!(
            params["code_challenge"],
            generate_code_challenge(pending.code_verifier.as_deref().unwrap())
        );
        assert_eq!(
            decode_state_token(&pending.state_token).unwrap().platform,
            PlatformId::Twitter
        );
    }

    #[tokio::test]
    async fn test_second_login_replaces_pending_state() {
        let store = SecretStore::in_memory();
        let connector = connector(store.clone());

        connector.start_login("u1").await.unwrap();
        let first: PendingAuthState = store.get(StorePrefix::TwitterPkce, "u1").await.unwrap();
        connector.start_login("u1").await.unwrap();
        let second: PendingAuthState = store.get(StorePrefix::TwitterPkce, "u1").await.unwrap();

        assert_ne!(first.state_token, second.state_token);
        assert!(!connector.complete_callback("u1", "code", &first.state_token).await);
    }

    #[tokio::test]
    async fn test_cancel_login_discards_pending_state() {
        let store = SecretStore::in_memory();
        let connector = connector(store.clone());

        connector.start_login("u1").await.unwrap();
        assert!(connector.cancel_login("u1").await);
        let pending: Option<PendingAuthState> = store.get(StorePrefix::TwitterPkce, "u1").await;
        assert!(pending.is_none());
    }

    #[tokio::test]
    async fn test_verify_without_tokens_is_false() {
        assert!(!connector(SecretStore::in_memory()).verify_and_refresh("u1").await);
    }
}
